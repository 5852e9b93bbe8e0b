use cfs_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("configuration api error: {0}")]
    Cfs(String),
    #[error("image service error: {0}")]
    Ims(String),
    #[error("scheduler error: {0}")]
    Scheduler(String),
    #[error("event bus error: {0}")]
    Bus(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("inventory error: {0}")]
    Inventory(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OperatorError {
    /// The addressed resource no longer exists; retrying cannot help.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound(_))
    }

    pub fn from_cfs(err: ClientError) -> Self {
        if err.is_not_found() {
            OperatorError::NotFound(err.to_string())
        } else {
            OperatorError::Cfs(err.to_string())
        }
    }

    pub fn from_ims(err: ClientError) -> Self {
        if err.is_not_found() {
            OperatorError::NotFound(err.to_string())
        } else {
            OperatorError::Ims(err.to_string())
        }
    }
}

pub type Result<T, E = OperatorError> = std::result::Result<T, E>;
