//! The subset of a Kubernetes `batch/v1` Job the operator reads back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label identifying execution units owned by this operator.
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/name";
pub const COMPONENT_LABEL_VALUE: &str = "cray-cfs-aee";
/// Label carrying the owning session name.
pub const SESSION_LABEL: &str = "cfsession";
/// Label values are capped at this length.
pub const LABEL_VALUE_MAX: usize = 60;

/// Truncate a label value to the cap, respecting char boundaries.
pub fn label_value(value: &str) -> String {
    value.chars().take(LABEL_VALUE_MAX).collect()
}

/// Selector matching every execution unit the operator owns.
pub fn component_selector() -> String {
    format!("{COMPONENT_LABEL}={COMPONENT_LABEL_VALUE}")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(default, rename = "type")]
    pub condition_type: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub completion_time: Option<String>,
    #[serde(default)]
    pub failed: Option<u32>,
    #[serde(default)]
    pub conditions: Vec<JobCondition>,
}

/// A scheduled execution unit as observed from the batch scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    #[serde(default)]
    pub metadata: JobMetadata,
    #[serde(default)]
    pub status: JobStatus,
}

impl ExecutionUnit {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn session_label(&self) -> Option<&str> {
        self.metadata.labels.get(SESSION_LABEL).map(String::as_str)
    }

    pub fn has_failed(&self) -> bool {
        self.status.failed.is_some_and(|count| count > 0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.completion_time.is_some() || self.has_failed()
    }

    /// Transition time of the first recorded condition.
    pub fn failure_time(&self) -> Option<&str> {
        self.status
            .conditions
            .first()
            .and_then(|condition| condition.last_transition_time.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_job_status() {
        let unit: ExecutionUnit = serde_json::from_value(json!({
            "metadata": {"name": "cfs-1", "labels": {"cfsession": "s1"}},
            "status": {
                "startTime": "2024-01-01T00:00:00Z",
                "failed": 1,
                "conditions": [{"type": "Failed", "lastTransitionTime": "2024-01-01T00:05:00Z"}]
            }
        }))
        .unwrap();
        assert_eq!(unit.session_label(), Some("s1"));
        assert!(unit.has_failed());
        assert!(unit.is_terminal());
        assert_eq!(unit.failure_time(), Some("2024-01-01T00:05:00Z"));
    }

    #[test]
    fn label_values_are_capped() {
        let long = "x".repeat(80);
        assert_eq!(label_value(&long).len(), LABEL_VALUE_MAX);
        assert_eq!(label_value("short"), "short");
    }
}
