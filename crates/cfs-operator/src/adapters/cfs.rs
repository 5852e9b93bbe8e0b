use async_trait::async_trait;
use cfs_client::CfsClient;
use cfs_protocol::{
    CfsOptions, Configuration, Session, SessionFilter, SessionState, SessionStatusPatch,
};
use serde_json::{Map, Value};

use super::traits::{ConfigurationStore, OptionsStore, SessionStore};
use crate::error::OperatorError;

#[async_trait]
impl SessionStore for CfsClient {
    async fn get_session(&self, name: &str) -> Result<Session, OperatorError> {
        CfsClient::get_session(self, name)
            .await
            .map_err(OperatorError::from_cfs)
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, OperatorError> {
        CfsClient::list_sessions(self, filter)
            .await
            .map_err(OperatorError::from_cfs)
    }

    async fn patch_session_status(
        &self,
        name: &str,
        patch: &SessionStatusPatch,
    ) -> Result<Session, OperatorError> {
        CfsClient::patch_session_status(self, name, patch)
            .await
            .map_err(OperatorError::from_cfs)
    }

    async fn delete_sessions(
        &self,
        status: SessionState,
        min_age: &str,
    ) -> Result<(), OperatorError> {
        CfsClient::delete_sessions(self, Some(status), Some(min_age))
            .await
            .map_err(OperatorError::from_cfs)
    }
}

#[async_trait]
impl ConfigurationStore for CfsClient {
    async fn get_configuration(&self, name: &str) -> Result<Configuration, OperatorError> {
        CfsClient::get_configuration(self, name)
            .await
            .map_err(OperatorError::from_cfs)
    }
}

#[async_trait]
impl OptionsStore for CfsClient {
    async fn get_options(&self) -> Result<Map<String, Value>, OperatorError> {
        CfsClient::get_options(self)
            .await
            .map_err(OperatorError::from_cfs)
    }

    async fn patch_options(&self, options: &Map<String, Value>) -> Result<CfsOptions, OperatorError> {
        CfsClient::patch_options(self, options)
            .await
            .map_err(OperatorError::from_cfs)
    }
}
