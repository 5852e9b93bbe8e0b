//! Client for the configuration API: sessions, configurations and options.

use std::time::Duration;

use cfs_protocol::{CfsOptions, Configuration, Session, SessionFilter, SessionState, SessionStatusPatch};
use reqwest::Method;
use serde_json::{Map, Value};

use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::transport::JsonTransport;

pub const DEFAULT_CFS_URL: &str = "http://cray-cfs-api/v3";

#[derive(Debug, Clone)]
pub struct CfsClient {
    transport: JsonTransport,
}

impl CfsClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, ClientError> {
        Ok(Self {
            transport: JsonTransport::new(base_url, timeout, retry)?,
        })
    }

    pub async fn get_session(&self, name: &str) -> Result<Session, ClientError> {
        let url = self.transport.url(&["sessions", name])?;
        self.transport.get(url, &[]).await
    }

    /// List sessions, following the `next` cursor of paged responses.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, ClientError> {
        let url = self.transport.url(&["sessions"])?;
        let mut query = Vec::new();
        if let Some(status) = filter.status {
            query.push(("status".to_string(), status.as_str().to_string()));
        }

        let mut sessions = Vec::new();
        loop {
            let page: Value = self.transport.get(url.clone(), &query).await?;
            match page {
                Value::Array(items) => {
                    sessions.extend(decode_sessions(items));
                    return Ok(sessions);
                }
                Value::Object(mut body) => {
                    if let Some(Value::Array(items)) = body.remove("sessions") {
                        sessions.extend(decode_sessions(items));
                    }
                    match body.remove("next") {
                        Some(Value::Object(next)) if !next.is_empty() => {
                            query = next_query(&next);
                        }
                        _ => return Ok(sessions),
                    }
                }
                other => {
                    return Err(ClientError::Decode(format!(
                        "unexpected session listing: {other}"
                    )));
                }
            }
        }
    }

    pub async fn patch_session_status(
        &self,
        name: &str,
        patch: &SessionStatusPatch,
    ) -> Result<Session, ClientError> {
        let url = self.transport.url(&["sessions", name])?;
        self.transport
            .write(Method::PATCH, url, &patch.to_body())
            .await
    }

    /// Delete sessions matching `status` that are older than `age` (e.g. `7d`).
    pub async fn delete_sessions(
        &self,
        status: Option<SessionState>,
        age: Option<&str>,
    ) -> Result<(), ClientError> {
        let url = self.transport.url(&["sessions"])?;
        let mut query = Vec::new();
        if let Some(status) = status {
            query.push(("status".to_string(), status.as_str().to_string()));
        }
        if let Some(age) = age.filter(|age| !age.is_empty()) {
            query.push(("age".to_string(), age.to_string()));
        }
        self.transport.delete(url, &query).await
    }

    pub async fn get_configuration(&self, name: &str) -> Result<Configuration, ClientError> {
        let url = self.transport.url(&["configurations", name])?;
        self.transport.get(url, &[]).await
    }

    /// Raw options as served, without defaults applied.
    pub async fn get_options(&self) -> Result<Map<String, Value>, ClientError> {
        let url = self.transport.url(&["options"])?;
        self.transport.get(url, &[]).await
    }

    pub async fn patch_options(&self, options: &Map<String, Value>) -> Result<CfsOptions, ClientError> {
        let url = self.transport.url(&["options"])?;
        self.transport.write(Method::PATCH, url, options).await
    }
}

/// Decode each listed session on its own; records that do not decode are
/// logged and skipped.
fn decode_sessions(items: Vec<Value>) -> Vec<Session> {
    items
        .into_iter()
        .filter_map(|item| {
            let name = item.get("name").cloned().unwrap_or_default();
            match serde_json::from_value(item) {
                Ok(session) => Some(session),
                Err(err) => {
                    tracing::warn!(session = %name, %err, "skipping undecodable session");
                    None
                }
            }
        })
        .collect()
}

fn next_query(next: &Map<String, Value>) -> Vec<(String, String)> {
    next.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn next_cursor_becomes_query() {
        let next = json!({"after_id": "s9", "limit": 100, "status": null});
        let mut query = next_query(next.as_object().unwrap());
        query.sort();
        assert_eq!(
            query,
            vec![
                ("after_id".to_string(), "s9".to_string()),
                ("limit".to_string(), "100".to_string())
            ]
        );
    }

    #[test]
    fn undecodable_sessions_are_skipped() {
        let items = vec![
            json!({"name": "good"}),
            json!({"name": "bad", "debug_on_failure": "sometimes"}),
            json!({"status": {}}),
            json!({"name": "nulls", "target": {"groups": null}, "tags": null}),
        ];
        let names: Vec<String> = decode_sessions(items).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["good", "nulls"]);
    }
}
