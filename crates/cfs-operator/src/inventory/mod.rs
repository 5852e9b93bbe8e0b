//! Inventory generation for the ansible execution environment.
//!
//! Each target definition kind maps to one generator. Generators produce an
//! ansible YAML-plugin inventory (`{group: {hosts: {host: {}}}}`) which is
//! written as JSON, a YAML subset. The `complete` marker is written whatever
//! the outcome so the ansible container never waits forever.

mod dynamic;
mod image;
mod repo;
mod spec;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cfs_protocol::session::Target;
use cfs_protocol::{Session, TargetDefinitionKind};
use serde_json::{Map, Value, json};

use crate::error::OperatorError;

pub use dynamic::DynamicInventory;
pub use image::{IMAGE_HOST_GROUP, ImageAccess, ImageInventory};
pub use repo::RepositoryInventory;
pub use spec::ExplicitInventory;

/// Files shared with the other containers of an execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryPaths {
    pub hosts: PathBuf,
    pub complete: PathBuf,
    pub image_to_job: PathBuf,
    pub public_key: PathBuf,
}

impl InventoryPaths {
    pub fn under(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            hosts: dir.join("hosts"),
            complete: dir.join("complete"),
            image_to_job: dir.join("image_to_job.yaml"),
            public_key: dir.join("ssh").join("id_image.pub"),
        }
    }
}

impl Default for InventoryPaths {
    fn default() -> Self {
        Self::under("/inventory")
    }
}

/// A generated inventory plus, for image targets, the image to job mapping
/// the teardown container needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    pub hosts: Value,
    pub image_to_job: Option<Value>,
}

impl Inventory {
    pub fn hosts(hosts: Value) -> Self {
        Self {
            hosts,
            image_to_job: None,
        }
    }
}

#[async_trait]
pub trait InventoryGenerator: Send + Sync {
    /// `None` when there is nothing to generate.
    async fn generate(&self, session: &Session) -> Result<Option<Inventory>, OperatorError>;

    async fn write(
        &self,
        inventory: Option<Inventory>,
        paths: &InventoryPaths,
    ) -> Result<(), OperatorError> {
        let Some(inventory) = inventory else {
            return Ok(());
        };
        tracing::info!(path = %paths.hosts.display(), "writing inventory");
        write_json(&paths.hosts, &inventory.hosts).await?;
        if let Some(image_to_job) = &inventory.image_to_job {
            write_json(&paths.image_to_job, image_to_job).await?;
        }
        Ok(())
    }
}

/// The known target definitions.
pub enum TargetDefinition {
    Dynamic(DynamicInventory),
    Spec(ExplicitInventory),
    Repo(RepositoryInventory),
    Image(ImageInventory),
}

impl TargetDefinition {
    pub fn kind(&self) -> TargetDefinitionKind {
        match self {
            TargetDefinition::Dynamic(_) => TargetDefinitionKind::Dynamic,
            TargetDefinition::Spec(_) => TargetDefinitionKind::Spec,
            TargetDefinition::Repo(_) => TargetDefinitionKind::Repo,
            TargetDefinition::Image(_) => TargetDefinitionKind::Image,
        }
    }

    fn generator(&self) -> &dyn InventoryGenerator {
        match self {
            TargetDefinition::Dynamic(generator) => generator,
            TargetDefinition::Spec(generator) => generator,
            TargetDefinition::Repo(generator) => generator,
            TargetDefinition::Image(generator) => generator,
        }
    }

    pub async fn generate_and_write(
        &self,
        session: &Session,
        paths: &InventoryPaths,
    ) -> Result<(), OperatorError> {
        let generator = self.generator();
        let inventory = generator.generate(session).await?;
        generator.write(inventory, paths).await
    }
}

/// Generate and write the inventory, then mark it complete. Generation
/// failures are logged and returned after the marker is written.
pub async fn produce_inventory(
    target: &TargetDefinition,
    session: &Session,
    paths: &InventoryPaths,
) -> Result<(), OperatorError> {
    tracing::info!(session = %session.name, target = ?target.kind(), "generating inventory");
    let outcome = target.generate_and_write(session, paths).await;
    if let Err(err) = &outcome {
        tracing::error!(session = %session.name, %err, "inventory generation failed");
    }
    mark_complete(paths).await?;
    outcome
}

pub async fn mark_complete(paths: &InventoryPaths) -> Result<(), OperatorError> {
    ensure_parent(&paths.complete).await?;
    tokio::fs::write(&paths.complete, b"").await?;
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), OperatorError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

async fn write_json(path: &Path, value: &Value) -> Result<(), OperatorError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|err| OperatorError::Inventory(err.to_string()))?;
    ensure_parent(path).await?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

/// Group name to members, merging repeated group names.
pub fn groups_members(target: &Target) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for group in &target.groups {
        groups
            .entry(group.name.clone())
            .or_default()
            .extend(group.members.iter().cloned());
    }
    groups
}

/// Member to the groups it belongs to.
pub fn members_groups(target: &Target) -> BTreeMap<String, BTreeSet<String>> {
    let mut members: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for group in &target.groups {
        for member in &group.members {
            members
                .entry(member.clone())
                .or_default()
                .insert(group.name.clone());
        }
    }
    members
}

/// `{group: {hosts: {member: {}}}}`
pub fn hosts_inventory(groups: &BTreeMap<String, Vec<String>>) -> Value {
    let mut inventory = Map::new();
    for (group, members) in groups {
        inventory.insert(group.clone(), json!({ "hosts": empty_hosts(members) }));
    }
    Value::Object(inventory)
}

fn empty_hosts<'a>(members: impl IntoIterator<Item = &'a String>) -> Value {
    Value::Object(
        members
            .into_iter()
            .map(|member| (member.clone(), json!({})))
            .collect(),
    )
}
