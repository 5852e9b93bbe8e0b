//! Read-only client for the hardware state manager, the source of dynamic
//! inventories.

use std::time::Duration;

use serde_json::Value;

use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::transport::JsonTransport;

pub const DEFAULT_HSM_URL: &str = "http://cray-smd/hsm/v2";

#[derive(Debug, Clone)]
pub struct HsmClient {
    transport: JsonTransport,
}

impl HsmClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, ClientError> {
        Ok(Self {
            transport: JsonTransport::new(base_url, timeout, retry)?,
        })
    }

    /// `[{label, members: {ids: [...]}}]`
    pub async fn groups(&self) -> Result<Vec<Value>, ClientError> {
        let url = self.transport.url(&["groups"])?;
        self.transport.get(url, &[]).await
    }

    /// `[{name, members: {ids: [...]}}]`
    pub async fn partitions(&self) -> Result<Vec<Value>, ClientError> {
        let url = self.transport.url(&["partitions"])?;
        self.transport.get(url, &[]).await
    }

    /// `{Components: [{ID, Role?, SubRole?}]}` restricted to nodes.
    pub async fn node_components(&self) -> Result<Value, ClientError> {
        let url = self.transport.url(&["State", "Components"])?;
        self.transport
            .get(url, &[("type".to_string(), "node".to_string())])
            .await
    }
}
