//! Periodic removal of completed sessions older than the configured TTL.

use std::sync::Arc;
use std::time::Duration;

use cfs_protocol::SessionState;

use crate::adapters::SessionStore;
use crate::error::OperatorError;
use crate::logging::LogHandle;
use crate::options::OptionsCache;
use crate::shutdown::ShutdownSignal;

pub struct SessionJanitor {
    sessions: Arc<dyn SessionStore>,
    options: Arc<OptionsCache>,
    log: LogHandle,
    interval: Duration,
}

impl SessionJanitor {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        options: Arc<OptionsCache>,
        log: LogHandle,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            options,
            log,
            interval,
        }
    }

    /// Refresh options, re-apply the log level and purge expired sessions.
    /// Returns whether a purge was requested.
    pub async fn run_once(&self) -> Result<bool, OperatorError> {
        let options = self.options.refresh().await?;
        self.log.set_level(&options.logging_level);
        let ttl = options.session_ttl.trim();
        if ttl.is_empty() {
            return Ok(false);
        }
        self.sessions.delete_sessions(SessionState::Complete, ttl).await?;
        tracing::debug!(ttl, "requested removal of expired sessions");
        Ok(true)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        loop {
            if shutdown.sleep(self.interval).await {
                return Ok(());
            }
            if let Err(err) = self.run_once().await {
                tracing::warn!(%err, "session cleanup failed");
            }
        }
    }
}
