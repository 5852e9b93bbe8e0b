use std::time::Duration;

use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::ClientError;
use crate::retry::{RetryPolicy, retry_async};

/// JSON-over-HTTP transport rooted at a service base url.
#[derive(Debug, Clone)]
pub(crate) struct JsonTransport {
    http: Client,
    base: Url,
    retry: RetryPolicy,
}

impl JsonTransport {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, ClientError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self { http, base, retry })
    }

    pub fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request, returning the decoded body or `None` when it is empty.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<Option<Value>, ClientError> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| ClientError::Decode(err.to_string()))?;
        retry_async(&self.retry, || {
            let mut request = self.http.request(method.clone(), url.clone());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }
            let target = url.to_string();
            async move {
                let response = request.send().await?;
                let status = response.status();
                let text = response.text().await?;
                if !status.is_success() {
                    return Err(ClientError::Status {
                        status,
                        url: target,
                        body: text,
                    });
                }
                if text.trim().is_empty() {
                    return Ok(None);
                }
                serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|err| ClientError::Decode(err.to_string()))
            }
        })
        .await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(String, String)],
    ) -> Result<T, ClientError> {
        let value = self.send::<Value>(Method::GET, url, query, None).await?;
        decode(value)
    }

    pub async fn write<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<T, ClientError> {
        let value = self.send(method, url, &[], Some(body)).await?;
        decode(value)
    }

    pub async fn delete(&self, url: Url, query: &[(String, String)]) -> Result<(), ClientError> {
        self.send::<Value>(Method::DELETE, url, query, None).await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(value: Option<Value>) -> Result<T, ClientError> {
    serde_json::from_value(value.unwrap_or(Value::Null))
        .map_err(|err| ClientError::Decode(err.to_string()))
}
