//! Session event envelope carried on the session event topic.

use serde::{Deserialize, Serialize};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create,
    Delete,
}

/// `{type, data, attempt_count?, attempt_start?}`. `attempt_start` is seconds
/// since the epoch of the first failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Session,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_start: Option<f64>,
}

impl SessionEvent {
    pub fn new(event_type: EventType, data: Session) -> Self {
        Self {
            event_type,
            data,
            attempt_count: None,
            attempt_start: None,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.data.name
    }
}
