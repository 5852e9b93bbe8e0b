//! Wire types shared by the configuration-session operator and its clients.
//!
//! Everything here is plain serde data: sessions and their status block, the
//! partial status patches the operator writes back, configurations and their
//! layers, service options, the session event envelope carried on the event
//! topic, image-management (IMS) jobs, and the subset of a Kubernetes Job the
//! operator reads.

pub mod configuration;
pub mod event;
pub mod ims;
pub mod job;
pub mod options;
pub mod session;

pub use configuration::{Configuration, Layer};
pub use event::{EventType, SessionEvent};
pub use ims::{CustomizeJobRequest, ImsImage, ImsJob, ImsJobStatus, PublicKey, SshContainer};
pub use job::{ExecutionUnit, JobCondition, JobMetadata, JobStatus, label_value};
pub use options::CfsOptions;
pub use session::{
    Session, SessionFilter, SessionState, SessionStatus, SessionStatusPatch, Succeeded,
    TargetDefinitionKind,
};
