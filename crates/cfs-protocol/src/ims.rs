use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImsJobStatus {
    #[default]
    Creating,
    FetchingImage,
    FetchingRecipe,
    WaitingForRepos,
    BuildingImage,
    WaitingOnUser,
    Packaging,
    Success,
    Error,
    #[serde(other)]
    Other,
}

impl ImsJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImsJobStatus::Success | ImsJobStatus::Error)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SshContainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub connection_info: Map<String, Value>,
}

/// Image-management job as served by IMS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImsJob {
    pub id: String,
    #[serde(default)]
    pub job_type: String,
    #[serde(default)]
    pub status: ImsJobStatus,
    #[serde(default)]
    pub artifact_id: String,
    #[serde(default)]
    pub image_root_archive_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resultant_image_id: Option<String>,
    #[serde(default)]
    pub ssh_containers: Vec<SshContainer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SshContainer {
    /// In-cluster `(host, port)` of the jail.
    pub fn cluster_endpoint(&self) -> Option<(String, u16)> {
        let info = self.connection_info.get("cluster.local")?;
        let host = info.get("host")?.as_str()?.to_string();
        let port = match info.get("port")? {
            Value::Number(number) => u16::try_from(number.as_u64()?).ok()?,
            Value::String(text) => text.parse().ok()?,
            _ => return None,
        };
        Some((host, port))
    }
}

impl ImsJob {
    pub fn ssh_container(&self, name: &str) -> Option<&SshContainer> {
        self.ssh_containers
            .iter()
            .find(|container| container.name == name)
    }
}

/// Request body for a customization job with one jailed ssh container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomizeJobRequest {
    pub job_type: String,
    pub image_root_archive_name: String,
    pub artifact_id: String,
    pub public_key_id: String,
    pub ssh_containers: Vec<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_dkms: bool,
}

impl CustomizeJobRequest {
    pub fn new(
        artifact_id: impl Into<String>,
        archive_name: impl Into<String>,
        public_key_id: impl Into<String>,
        container_name: &str,
        require_dkms: bool,
    ) -> Self {
        Self {
            job_type: "customize".into(),
            image_root_archive_name: archive_name.into(),
            artifact_id: artifact_id.into(),
            public_key_id: public_key_id.into(),
            ssh_containers: vec![serde_json::json!({"name": container_name, "jail": true})],
            require_dkms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImsImage {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: String,
    #[serde(default)]
    pub name: String,
}
