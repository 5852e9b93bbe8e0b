//! Collaborator seams and their production implementations.

pub mod cfs;
pub mod ims;
pub mod kafka;
pub mod kubernetes;
pub mod traits;

pub use traits::{
    ConfigurationStore, Delivery, EventBus, ImageService, JobScheduler, OptionsStore,
    SecondaryJobs, SessionStore,
};
