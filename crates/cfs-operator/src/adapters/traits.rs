use async_trait::async_trait;
use cfs_protocol::{
    CfsOptions, Configuration, CustomizeJobRequest, ExecutionUnit, ImsImage, ImsJob, PublicKey,
    Session, SessionFilter, SessionState, SessionStatusPatch,
};
use serde_json::{Map, Value};

use crate::error::OperatorError;

/// Desired-state records served by the configuration API.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, name: &str) -> Result<Session, OperatorError>;
    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, OperatorError>;
    async fn patch_session_status(
        &self,
        name: &str,
        patch: &SessionStatusPatch,
    ) -> Result<Session, OperatorError>;
    /// Delete sessions in `status` older than `min_age` (e.g. `7d`).
    async fn delete_sessions(
        &self,
        status: SessionState,
        min_age: &str,
    ) -> Result<(), OperatorError>;
}

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn get_configuration(&self, name: &str) -> Result<Configuration, OperatorError>;
}

#[async_trait]
pub trait OptionsStore: Send + Sync {
    async fn get_options(&self) -> Result<Map<String, Value>, OperatorError>;
    async fn patch_options(&self, options: &Map<String, Value>) -> Result<CfsOptions, OperatorError>;
}

/// The batch scheduler running execution units.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn create_job(&self, manifest: &Value) -> Result<(), OperatorError>;
    async fn get_job(&self, name: &str) -> Result<ExecutionUnit, OperatorError>;
    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<ExecutionUnit>, OperatorError>;
    async fn delete_job(&self, name: &str) -> Result<(), OperatorError>;
    /// Cheap reachability probe used while waiting for networking.
    async fn ping(&self) -> Result<(), OperatorError>;
}

/// The secondary (image-management) job system.
#[async_trait]
pub trait SecondaryJobs: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<ImsJob>, OperatorError>;
    async fn delete_job(&self, id: &str) -> Result<(), OperatorError>;
}

/// Image-management calls made while preparing image customization.
#[async_trait]
pub trait ImageService: Send + Sync {
    async fn get_image(&self, id: &str) -> Result<ImsImage, OperatorError>;
    async fn create_job(&self, request: &CustomizeJobRequest) -> Result<ImsJob, OperatorError>;
    async fn get_job(&self, id: &str) -> Result<ImsJob, OperatorError>;
    async fn create_public_key(&self, name: &str, key: &str) -> Result<PublicKey, OperatorError>;
    async fn delete_public_key(&self, id: &str) -> Result<(), OperatorError>;
}

/// One message read from the event topic, detached from the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Wait for the next message.
    async fn next(&self) -> Result<Delivery, OperatorError>;
    /// Commit the consumer position past `delivery`.
    async fn commit(&self, delivery: &Delivery) -> Result<(), OperatorError>;
    /// Publish a payload to the event topic.
    async fn publish(&self, payload: &[u8]) -> Result<(), OperatorError>;
}
