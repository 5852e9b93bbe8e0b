use async_trait::async_trait;
use cfs_protocol::Session;

use super::{Inventory, InventoryGenerator, InventoryPaths};
use crate::error::OperatorError;

/// Inventory shipped inside the configuration repository. Nothing is
/// generated; writing only checks that the file is in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepositoryInventory;

#[async_trait]
impl InventoryGenerator for RepositoryInventory {
    async fn generate(&self, _session: &Session) -> Result<Option<Inventory>, OperatorError> {
        Ok(None)
    }

    async fn write(
        &self,
        _inventory: Option<Inventory>,
        paths: &InventoryPaths,
    ) -> Result<(), OperatorError> {
        tracing::info!(path = %paths.hosts.display(), "verifying repository inventory exists");
        if tokio::fs::try_exists(&paths.hosts).await? {
            Ok(())
        } else {
            Err(OperatorError::Inventory(format!(
                "inventory file {} does not exist",
                paths.hosts.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn existing_repository_inventory_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InventoryPaths::under(dir.path());
        std::fs::write(&paths.hosts, "all:\n  hosts: {}\n").unwrap();

        let generator = RepositoryInventory;
        let inventory = generator.generate(&Session::new("s")).await.unwrap();
        assert!(inventory.is_none());
        generator.write(inventory, &paths).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&paths.hosts).unwrap(),
            "all:\n  hosts: {}\n"
        );
    }
}
