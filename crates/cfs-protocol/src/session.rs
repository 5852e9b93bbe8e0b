//! Configuration sessions and their status block.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Reads an explicit `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lifecycle state recorded in `status.session.status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Pending,
    Running,
    Complete,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Running => "running",
            SessionState::Complete => "complete",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded in `status.session.succeeded`. Serialized as the strings
/// the API stores (`"true"`, `"false"`, `"unknown"`, `"none"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Succeeded {
    True,
    False,
    Unknown,
    #[default]
    None,
}

/// How the inventory for a session is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetDefinitionKind {
    #[default]
    Dynamic,
    Spec,
    Repo,
    Image,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub limit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnsibleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub verbosity: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMapping {
    #[serde(alias = "source_id")]
    pub source_id: String,
    #[serde(alias = "result_name")]
    pub result_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default, deserialize_with = "null_as_default")]
    pub definition: TargetDefinitionKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<TargetGroup>,
    #[serde(default, alias = "image_map", deserialize_with = "null_as_default")]
    pub image_map: Vec<ImageMapping>,
}

impl Target {
    /// All group members, in group order.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|group| group.members.iter().map(String::as_str))
    }
}

/// The `status.session` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: SessionState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub succeeded: Succeeded,
    #[serde(default, alias = "start_time", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, alias = "completion_time", skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
    #[serde(default, alias = "ims_job", skip_serializing_if = "Option::is_none")]
    pub ims_job: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounts {
    #[serde(default, deserialize_with = "null_as_default")]
    pub running: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub failed: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusBlock {
    #[serde(default, deserialize_with = "null_as_default")]
    pub session: SessionStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub targets: TargetCounts,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artifacts: Vec<Value>,
}

/// A configuration session as served by the configuration API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub configuration: SessionConfiguration,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansible: Option<AnsibleSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub debug_on_failure: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: SessionStatusBlock,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Recorded execution-unit id, treating an empty string as absent.
    pub fn job_id(&self) -> Option<&str> {
        self.status
            .session
            .job
            .as_deref()
            .filter(|job| !job.is_empty())
    }

    pub fn ims_job_id(&self) -> Option<&str> {
        self.status
            .session
            .ims_job
            .as_deref()
            .filter(|job| !job.is_empty())
    }

    pub fn state(&self) -> SessionState {
        self.status.session.status
    }

    pub fn is_complete(&self) -> bool {
        self.state() == SessionState::Complete
    }
}

/// Partial update of `status.session`; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<Succeeded>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

impl SessionStatusPatch {
    pub fn job(job_id: impl Into<String>) -> Self {
        Self {
            job: Some(job_id.into()),
            ..Self::default()
        }
    }

    pub fn running(start_time: Option<String>) -> Self {
        Self {
            status: Some(SessionState::Running),
            start_time,
            ..Self::default()
        }
    }

    pub fn complete(succeeded: Succeeded, completion_time: Option<String>) -> Self {
        Self {
            status: Some(SessionState::Complete),
            succeeded: Some(succeeded),
            completion_time,
            ..Self::default()
        }
    }

    /// Request body for the session PATCH endpoint.
    pub fn to_body(&self) -> Value {
        serde_json::json!({ "status": { "session": self } })
    }

    /// Apply the patch to a local snapshot.
    pub fn apply_to(&self, status: &mut SessionStatus) {
        if let Some(job) = &self.job {
            status.job = Some(job.clone());
        }
        if let Some(state) = self.status {
            status.status = state;
        }
        if let Some(succeeded) = self.succeeded {
            status.succeeded = succeeded;
        }
        if let Some(start) = &self.start_time {
            status.start_time = Some(start.clone());
        }
        if let Some(done) = &self.completion_time {
            status.completion_time = Some(done.clone());
        }
    }
}

/// Query filter for listing sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub status: Option<SessionState>,
}

impl SessionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: SessionState) -> Self {
        Self {
            status: Some(status),
        }
    }
}
