use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Global service options stored by the configuration API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfsOptions {
    pub session_ttl: String,
    pub default_ansible_config: String,
    pub default_playbook: String,
    pub additional_inventory_url: String,
    pub additional_inventory_source: String,
    pub logging_level: String,
    pub debug_wait_time: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for CfsOptions {
    fn default() -> Self {
        Self {
            session_ttl: "7d".into(),
            default_ansible_config: "cfs-default-ansible-cfg".into(),
            default_playbook: "site.yml".into(),
            additional_inventory_url: String::new(),
            additional_inventory_source: String::new(),
            logging_level: "INFO".into(),
            debug_wait_time: 3600,
            extra: Map::new(),
        }
    }
}

impl CfsOptions {
    /// Default values keyed by option name.
    pub fn defaults() -> Map<String, Value> {
        let defaults = Self::default();
        let mut map = Map::new();
        map.insert("session_ttl".into(), json!(defaults.session_ttl));
        map.insert(
            "default_ansible_config".into(),
            json!(defaults.default_ansible_config),
        );
        map.insert("default_playbook".into(), json!(defaults.default_playbook));
        map.insert(
            "additional_inventory_url".into(),
            json!(defaults.additional_inventory_url),
        );
        map.insert(
            "additional_inventory_source".into(),
            json!(defaults.additional_inventory_source),
        );
        map.insert("logging_level".into(), json!(defaults.logging_level));
        map.insert("debug_wait_time".into(), json!(defaults.debug_wait_time));
        map
    }

    /// Defaults whose keys are absent from `served`.
    pub fn missing_defaults(served: &Map<String, Value>) -> Map<String, Value> {
        Self::defaults()
            .into_iter()
            .filter(|(key, _)| !served.contains_key(key))
            .collect()
    }
}
