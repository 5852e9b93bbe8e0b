//! Session event consumption.

mod ingestor;
mod retry;

pub use ingestor::{Disposition, EventHandler, EventIngestor};
pub use retry::{EventRetryPolicy, MAX_ATTEMPTS, MAX_ELAPSED, RetryDecision, epoch_seconds, stamp_attempt};
