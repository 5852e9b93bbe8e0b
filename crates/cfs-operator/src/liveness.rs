//! File-backed liveness timestamp.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::shutdown::ShutdownSignal;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct Timestamp {
    path: PathBuf,
}

impl Timestamp {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record now as the last sign of life.
    pub fn touch(&self) -> std::io::Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, now.to_string())
    }

    /// Age of the recorded timestamp, or `None` when missing or unreadable.
    pub fn age(&self) -> Option<Duration> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let recorded: f64 = raw.trim().parse().ok()?;
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
        Some(Duration::from_secs_f64((now - recorded).max(0.0)))
    }

    pub fn is_alive(&self, max_age: Duration) -> bool {
        self.age().is_some_and(|age| age <= max_age)
    }

    /// Best-effort touch for hot paths.
    pub fn beat(&self) {
        if let Err(err) = self.touch() {
            tracing::warn!(path = %self.path.display(), %err, "failed to update liveness timestamp");
        }
    }
}

pub async fn heartbeat(
    timestamp: Timestamp,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    loop {
        timestamp.beat();
        if shutdown.sleep(interval).await {
            return Ok(());
        }
    }
}
