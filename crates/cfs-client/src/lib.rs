//! Async HTTP clients for the configuration API, the image-management
//! service (IMS) and the hardware state manager (HSM).
//!
//! All clients share one JSON transport with a bounded, fixed-delay retry on
//! connection failures and gateway errors.

pub mod cfs;
pub mod error;
pub mod hsm;
pub mod ims;
pub mod retry;
mod transport;

pub use cfs::CfsClient;
pub use error::ClientError;
pub use hsm::HsmClient;
pub use ims::ImsClient;
pub use retry::{RetryPolicy, retry_async};
