//! Client for the image-management service (IMS).

use std::time::Duration;

use cfs_protocol::{CustomizeJobRequest, ImsImage, ImsJob, PublicKey};
use reqwest::Method;
use serde_json::json;

use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::transport::JsonTransport;

pub const DEFAULT_IMS_URL: &str = "http://cray-ims/v3";

#[derive(Debug, Clone)]
pub struct ImsClient {
    transport: JsonTransport,
}

impl ImsClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, ClientError> {
        Ok(Self {
            transport: JsonTransport::new(base_url, timeout, retry)?,
        })
    }

    pub async fn list_jobs(&self) -> Result<Vec<ImsJob>, ClientError> {
        let url = self.transport.url(&["jobs"])?;
        self.transport.get(url, &[]).await
    }

    pub async fn get_job(&self, id: &str) -> Result<ImsJob, ClientError> {
        let url = self.transport.url(&["jobs", id])?;
        self.transport.get(url, &[]).await
    }

    pub async fn create_job(&self, request: &CustomizeJobRequest) -> Result<ImsJob, ClientError> {
        let url = self.transport.url(&["jobs"])?;
        self.transport.write(Method::POST, url, request).await
    }

    pub async fn delete_job(&self, id: &str) -> Result<(), ClientError> {
        let url = self.transport.url(&["jobs", id])?;
        self.transport.delete(url, &[]).await
    }

    pub async fn get_image(&self, id: &str) -> Result<ImsImage, ClientError> {
        let url = self.transport.url(&["images", id])?;
        self.transport.get(url, &[]).await
    }

    /// Reachability probe against the image listing.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let url = self.transport.url(&["images"])?;
        self.transport
            .send::<serde_json::Value>(Method::GET, url, &[], None)
            .await?;
        Ok(())
    }

    pub async fn create_public_key(&self, name: &str, public_key: &str) -> Result<PublicKey, ClientError> {
        let url = self.transport.url(&["public-keys"])?;
        self.transport
            .write(Method::POST, url, &json!({"name": name, "public_key": public_key}))
            .await
    }

    pub async fn delete_public_key(&self, id: &str) -> Result<(), ClientError> {
        let url = self.transport.url(&["public-keys", id])?;
        self.transport.delete(url, &[]).await
    }
}
