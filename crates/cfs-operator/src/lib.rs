//! Configuration-session operator.
//!
//! Watches session lifecycle events, realises each session as a scheduled
//! execution unit, tracks it to completion and keeps the session store, the
//! scheduler and the image-management service consistent with each other.

pub mod adapters;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod ims_sweeper;
pub mod inventory;
pub mod janitor;
pub mod job_spec;
pub mod layers;
pub mod liveness;
pub mod logging;
pub mod monitor;
pub mod operator;
pub mod options;
pub mod reconciler;
pub mod shutdown;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use config::{OperatorArgs, OperatorConfig};
pub use error::OperatorError;
