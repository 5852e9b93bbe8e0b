use std::collections::BTreeMap;

use async_trait::async_trait;
use cfs_client::HsmClient;
use cfs_protocol::Session;
use serde_json::{Map, Value, json};

use super::{Inventory, InventoryGenerator};
use crate::error::OperatorError;

/// Inventory built from hardware state manager groups, partitions and node
/// roles. A source that cannot be read contributes no groups.
#[derive(Debug, Clone)]
pub struct DynamicInventory {
    hsm: HsmClient,
}

impl DynamicInventory {
    pub fn new(hsm: HsmClient) -> Self {
        Self { hsm }
    }
}

#[async_trait]
impl InventoryGenerator for DynamicInventory {
    async fn generate(&self, _session: &Session) -> Result<Option<Inventory>, OperatorError> {
        let mut groups = Map::new();
        match self.hsm.groups().await {
            Ok(data) => groups.extend(labelled_groups(&data, "label")),
            Err(err) => tracing::error!(%err, "failed to read groups"),
        }
        match self.hsm.partitions().await {
            Ok(data) => groups.extend(labelled_groups(&data, "name")),
            Err(err) => tracing::error!(%err, "failed to read partitions"),
        }
        match self.hsm.node_components().await {
            Ok(data) => groups.extend(role_groups(&data)),
            Err(err) => tracing::error!(%err, "failed to read components"),
        }
        tracing::info!(groups = groups.len(), "dynamic inventory generated");
        Ok(Some(Inventory::hosts(json!({ "all": { "children": groups } }))))
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Groups or partitions: `[{<key>, members: {ids: [...]}}]`.
fn labelled_groups(data: &[Value], key: &str) -> Map<String, Value> {
    data.iter()
        .filter_map(|group| {
            let label = group.get(key)?;
            let hosts: Map<String, Value> = group["members"]["ids"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|id| (text(id), json!({})))
                .collect();
            Some((text(label), json!({ "hosts": hosts })))
        })
        .collect()
}

/// Nodes grouped by `Role` and by `Role_SubRole`.
fn role_groups(data: &Value) -> Map<String, Value> {
    let mut hosts: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for component in data["Components"].as_array().into_iter().flatten() {
        let Some(id) = component.get("ID").map(text) else {
            continue;
        };
        let role = component.get("Role").map(text);
        if let Some(role) = &role {
            hosts.entry(role.clone()).or_default().insert(id.clone(), json!({}));
        }
        if let Some(sub_role) = component.get("SubRole").map(text) {
            let group = format!("{}_{sub_role}", role.unwrap_or_default());
            hosts.entry(group).or_default().insert(id, json!({}));
        }
    }
    hosts
        .into_iter()
        .map(|(group, members)| (group, json!({ "hosts": members })))
        .collect()
}
