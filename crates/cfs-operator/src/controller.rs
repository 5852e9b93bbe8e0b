//! Session lifecycle: realise CREATE and DELETE against the scheduler.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cfs_protocol::{EventType, Session, SessionEvent, SessionStatusPatch};
use uuid::Uuid;

use crate::adapters::{ConfigurationStore, JobScheduler, SecondaryJobs, SessionStore};
use crate::error::OperatorError;
use crate::events::EventHandler;
use crate::job_spec::JobTemplate;
use crate::layers::resolve_layers;
use crate::monitor::JobMonitor;
use crate::options::OptionsCache;

/// Who asked for a handler to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Event,
    Reconciler,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Event => f.write_str("event"),
            Origin::Reconciler => f.write_str("reconciler"),
        }
    }
}

pub fn new_job_id() -> String {
    format!("cfs-{}", Uuid::new_v4())
}

pub struct SessionController {
    sessions: Arc<dyn SessionStore>,
    configurations: Arc<dyn ConfigurationStore>,
    scheduler: Arc<dyn JobScheduler>,
    secondary: Arc<dyn SecondaryJobs>,
    monitor: Arc<JobMonitor>,
    options: Arc<OptionsCache>,
    template: JobTemplate,
}

impl SessionController {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        configurations: Arc<dyn ConfigurationStore>,
        scheduler: Arc<dyn JobScheduler>,
        secondary: Arc<dyn SecondaryJobs>,
        monitor: Arc<JobMonitor>,
        options: Arc<OptionsCache>,
        template: JobTemplate,
    ) -> Self {
        Self {
            sessions,
            configurations,
            scheduler,
            secondary,
            monitor,
            options,
            template,
        }
    }

    /// Record a fresh job id on the session, then build and submit its unit.
    ///
    /// Submission failures are logged, not returned: the session keeps its job
    /// id and is left for the reconciler.
    pub async fn handle_create(&self, session: &Session, origin: Origin) -> Result<String, OperatorError> {
        let job_id = new_job_id();
        tracing::info!(session = %session.name, job = %job_id, %origin, "creating job");
        let session = self
            .sessions
            .patch_session_status(&session.name, &SessionStatusPatch::job(&job_id))
            .await?;

        let resolved = resolve_layers(self.configurations.as_ref(), &session.configuration).await?;
        let manifest = self
            .template
            .build(&session, &job_id, &resolved, &self.options.current());
        match self.scheduler.create_job(&manifest).await {
            Ok(()) => tracing::info!(session = %session.name, job = %job_id, "job request created"),
            Err(err) => tracing::error!(session = %session.name, job = %job_id, %err, "unable to create job"),
        }

        self.monitor.track(session);
        Ok(job_id)
    }

    /// Record an already running unit as the session's job and monitor it.
    pub async fn handle_adopt(&self, session: &Session, job_id: &str, origin: Origin) -> Result<(), OperatorError> {
        tracing::info!(session = %session.name, job = %job_id, %origin, "adopting existing job");
        let session = self
            .sessions
            .patch_session_status(&session.name, &SessionStatusPatch::job(job_id))
            .await?;
        self.monitor.track(session.clone());
        self.monitor.reconcile_session(&session).await
    }

    /// Remove the session's unit and secondary job. Never fails.
    pub async fn handle_delete(&self, session: &Session, origin: Origin) {
        if let Some(job_id) = session.job_id() {
            match self.scheduler.delete_job(job_id).await {
                Ok(()) => tracing::info!(session = %session.name, job = job_id, %origin, "job deleted"),
                Err(err) if err.is_not_found() => {
                    tracing::warn!(session = %session.name, job = job_id, "job not deleted; not found");
                }
                Err(err) => {
                    tracing::warn!(session = %session.name, job = job_id, %err, "failed to delete job");
                }
            }
        }
        if let Some(ims_job) = session.ims_job_id() {
            match self.secondary.delete_job(ims_job).await {
                Ok(()) => tracing::info!(session = %session.name, ims_job, "IMS job deleted"),
                Err(err) => {
                    tracing::warn!(session = %session.name, ims_job, %err, "failed to delete IMS job");
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for SessionController {
    async fn handle(&self, event: &SessionEvent) -> Result<(), OperatorError> {
        match event.event_type {
            EventType::Create => self.handle_create(&event.data, Origin::Event).await.map(|_| ()),
            EventType::Delete => {
                self.handle_delete(&event.data, Origin::Event).await;
                Ok(())
            }
        }
    }
}
