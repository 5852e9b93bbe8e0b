use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One ordered unit of configuration content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub clone_url: String,
    #[serde(default)]
    pub playbook: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Position tag handed to the execution environment (`"0"`, `"1"`, or `"debug"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Layer {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_inventory: Option<Layer>,
}

impl Configuration {
    /// Whether any layer asks for a DKMS-capable image customization jail.
    pub fn requires_dkms(&self) -> bool {
        self.layers.iter().any(|layer| {
            ["special_parameters", "specialParameters"]
                .iter()
                .filter_map(|key| layer.extra.get(*key))
                .any(|params| {
                    ["ims_require_dkms", "imsRequireDkms"]
                        .iter()
                        .any(|flag| params.get(*flag) == Some(&Value::Bool(true)))
                })
        })
    }
}
