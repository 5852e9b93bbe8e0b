use async_trait::async_trait;
use cfs_protocol::Session;

use super::{Inventory, InventoryGenerator, groups_members, hosts_inventory};
use crate::error::OperatorError;

/// Inventory taken verbatim from the session's target groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitInventory;

#[async_trait]
impl InventoryGenerator for ExplicitInventory {
    async fn generate(&self, session: &Session) -> Result<Option<Inventory>, OperatorError> {
        let inventory = hosts_inventory(&groups_members(&session.target));
        tracing::debug!(%inventory, "inventory generated");
        Ok(Some(Inventory::hosts(inventory)))
    }
}
