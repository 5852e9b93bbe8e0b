//! Batch scheduler backed by the Kubernetes `batch/v1` Jobs API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use cfs_protocol::ExecutionUnit;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::traits::JobScheduler;
use crate::error::OperatorError;

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    items: Vec<ExecutionUnit>,
}

pub struct KubernetesScheduler {
    http: Client,
    api_url: String,
    namespace: String,
    token_path: Option<PathBuf>,
}

impl KubernetesScheduler {
    /// Build a client for the in-cluster API server. A missing CA file falls
    /// back to the system roots; a missing token file sends no credentials.
    pub fn new(
        api_url: &str,
        namespace: &str,
        token_path: &Path,
        ca_path: &Path,
        timeout: Duration,
    ) -> Result<Self, OperatorError> {
        let mut builder = Client::builder().timeout(timeout);
        match std::fs::read(ca_path) {
            Ok(pem) => {
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|err| OperatorError::Scheduler(format!("invalid CA bundle: {err}")))?;
                builder = builder.add_root_certificate(cert);
            }
            Err(err) => {
                tracing::debug!(path = %ca_path.display(), %err, "no cluster CA bundle");
            }
        }
        let http = builder
            .build()
            .map_err(|err| OperatorError::Scheduler(err.to_string()))?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token_path: token_path.exists().then(|| token_path.to_path_buf()),
        })
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.api_url, self.namespace
        )
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, OperatorError> {
        let mut request = self.http.request(method, url);
        // Projected service-account tokens rotate, so read on every call.
        if let Some(path) = &self.token_path {
            let token = tokio::fs::read_to_string(path).await?;
            request = request.bearer_auth(token.trim());
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value, OperatorError> {
        let response = request
            .send()
            .await
            .map_err(|err| OperatorError::Scheduler(format!("{what}: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| OperatorError::Scheduler(format!("{what}: {err}")))?;
        if status == StatusCode::NOT_FOUND {
            return Err(OperatorError::NotFound(format!("{what}: {body}")));
        }
        if !status.is_success() {
            return Err(OperatorError::Scheduler(format!("{what}: {status} {body}")));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| OperatorError::Scheduler(format!("{what}: {err}")))
    }
}

#[async_trait]
impl JobScheduler for KubernetesScheduler {
    async fn create_job(&self, manifest: &Value) -> Result<(), OperatorError> {
        let request = self.request(Method::POST, &self.jobs_url()).await?.json(manifest);
        self.send(request, "create job").await?;
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<ExecutionUnit, OperatorError> {
        let url = format!("{}/{name}", self.jobs_url());
        let request = self.request(Method::GET, &url).await?;
        let body = self.send(request, &format!("read job {name}")).await?;
        serde_json::from_value(body).map_err(|err| OperatorError::Scheduler(err.to_string()))
    }

    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<ExecutionUnit>, OperatorError> {
        let request = self
            .request(Method::GET, &self.jobs_url())
            .await?
            .query(&[("labelSelector", label_selector)]);
        let body = self.send(request, "list jobs").await?;
        let list: JobList =
            serde_json::from_value(body).map_err(|err| OperatorError::Scheduler(err.to_string()))?;
        Ok(list.items)
    }

    async fn delete_job(&self, name: &str) -> Result<(), OperatorError> {
        let url = format!("{}/{name}", self.jobs_url());
        let request = self
            .request(Method::DELETE, &url)
            .await?
            .query(&[("propagationPolicy", "Background")]);
        self.send(request, &format!("delete job {name}")).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), OperatorError> {
        let url = format!("{}/apis/batch/v1", self.api_url);
        let request = self.request(Method::GET, &url).await?;
        self.send(request, "api discovery").await?;
        Ok(())
    }
}
