use async_trait::async_trait;
use cfs_client::ImsClient;
use cfs_protocol::{CustomizeJobRequest, ImsImage, ImsJob, PublicKey};

use super::traits::{ImageService, SecondaryJobs};
use crate::error::OperatorError;

#[async_trait]
impl SecondaryJobs for ImsClient {
    async fn list_jobs(&self) -> Result<Vec<ImsJob>, OperatorError> {
        ImsClient::list_jobs(self)
            .await
            .map_err(OperatorError::from_ims)
    }

    async fn delete_job(&self, id: &str) -> Result<(), OperatorError> {
        ImsClient::delete_job(self, id)
            .await
            .map_err(OperatorError::from_ims)
    }
}

#[async_trait]
impl ImageService for ImsClient {
    async fn get_image(&self, id: &str) -> Result<ImsImage, OperatorError> {
        ImsClient::get_image(self, id)
            .await
            .map_err(OperatorError::from_ims)
    }

    async fn create_job(&self, request: &CustomizeJobRequest) -> Result<ImsJob, OperatorError> {
        ImsClient::create_job(self, request)
            .await
            .map_err(OperatorError::from_ims)
    }

    async fn get_job(&self, id: &str) -> Result<ImsJob, OperatorError> {
        ImsClient::get_job(self, id)
            .await
            .map_err(OperatorError::from_ims)
    }

    async fn create_public_key(&self, name: &str, key: &str) -> Result<PublicKey, OperatorError> {
        ImsClient::create_public_key(self, name, key)
            .await
            .map_err(OperatorError::from_ims)
    }

    async fn delete_public_key(&self, id: &str) -> Result<(), OperatorError> {
        ImsClient::delete_public_key(self, id)
            .await
            .map_err(OperatorError::from_ims)
    }
}
