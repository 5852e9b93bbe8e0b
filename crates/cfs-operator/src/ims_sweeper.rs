//! Removes image-management jobs left running by completed sessions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cfs_protocol::{SessionFilter, SessionState};

use crate::adapters::{SecondaryJobs, SessionStore};
use crate::error::OperatorError;
use crate::shutdown::ShutdownSignal;

pub struct ImsSweeper {
    sessions: Arc<dyn SessionStore>,
    jobs: Arc<dyn SecondaryJobs>,
    interval: Duration,
}

impl ImsSweeper {
    pub fn new(sessions: Arc<dyn SessionStore>, jobs: Arc<dyn SecondaryJobs>, interval: Duration) -> Self {
        Self {
            sessions,
            jobs,
            interval,
        }
    }

    /// One pass. Every candidate is attempted; the last failure is returned.
    pub async fn sweep(&self) -> Result<usize, OperatorError> {
        let running: HashSet<String> = self
            .jobs
            .list_jobs()
            .await?
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .map(|job| job.id)
            .collect();
        if running.is_empty() {
            return Ok(0);
        }

        let completed = self
            .sessions
            .list_sessions(&SessionFilter::with_status(SessionState::Complete))
            .await?;
        let mut deleted = 0;
        let mut last_error = None;
        for session in completed {
            let Some(ims_job) = session.ims_job_id() else {
                continue;
            };
            if !running.contains(ims_job) {
                continue;
            }
            match self.jobs.delete_job(ims_job).await {
                Ok(()) => {
                    tracing::info!(session = %session.name, ims_job, "deleted orphaned IMS job");
                    deleted += 1;
                }
                Err(err) => {
                    tracing::debug!(session = %session.name, ims_job, %err, "IMS job delete failed");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.sweep().await {
                tracing::warn!(%err, "IMS job cleanup failed");
            }
            if shutdown.sleep(self.interval).await {
                return Ok(());
            }
        }
    }
}
