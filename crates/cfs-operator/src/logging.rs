//! Tracing setup with a runtime-adjustable level.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

use crate::shutdown::ShutdownSignal;

type LevelSetter = Box<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

struct LogState {
    setter: LevelSetter,
    configured: Mutex<String>,
    debug_forced: AtomicBool,
}

/// Handle for changing the active log level after startup.
#[derive(Clone)]
pub struct LogHandle {
    inner: Arc<LogState>,
}

/// Map service-style level names (`WARNING`, `CRITICAL`, ...) onto tracing levels.
pub fn tracing_level(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" | "FATAL" => "error",
        _ => "info",
    }
}

impl LogHandle {
    /// Install the global subscriber.
    pub fn init(level: &str) -> Self {
        let (filter, handle) = reload::Layer::new(EnvFilter::new(tracing_level(level)));
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_level(true),
            )
            .init();
        Self::with_setter(
            level,
            Box::new(move |directive| {
                handle
                    .reload(EnvFilter::new(directive))
                    .map_err(|err| err.to_string())
            }),
        )
    }

    /// A handle that tracks levels without a subscriber behind it.
    pub fn detached(level: &str) -> Self {
        Self::with_setter(level, Box::new(|_| Ok(())))
    }

    fn with_setter(level: &str, setter: LevelSetter) -> Self {
        Self {
            inner: Arc::new(LogState {
                setter,
                configured: Mutex::new(level.to_string()),
                debug_forced: AtomicBool::new(false),
            }),
        }
    }

    /// Level as configured, ignoring any forced debug override.
    pub fn configured_level(&self) -> String {
        self.inner.configured.lock().unwrap().clone()
    }

    /// Level currently in force.
    pub fn effective_level(&self) -> &'static str {
        if self.inner.debug_forced.load(Ordering::SeqCst) {
            "debug"
        } else {
            tracing_level(&self.configured_level())
        }
    }

    pub fn set_level(&self, level: &str) {
        let changed = {
            let mut configured = self.inner.configured.lock().unwrap();
            let changed = !configured.eq_ignore_ascii_case(level);
            *configured = level.to_string();
            changed
        };
        if changed {
            tracing::info!(level, "log level updated");
        }
        self.apply();
    }

    pub fn force_debug(&self, on: bool) {
        let was = self.inner.debug_forced.swap(on, Ordering::SeqCst);
        if was != on {
            self.apply();
            tracing::info!(debug = on, "debug override toggled");
        }
    }

    fn apply(&self) {
        if let Err(err) = (self.inner.setter)(self.effective_level()) {
            tracing::warn!(%err, "failed to apply log level");
        }
    }
}

/// Force DEBUG while `path` exists, polling every `interval`.
pub async fn watch_debug_file(
    handle: LogHandle,
    path: PathBuf,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    loop {
        let present = tokio::fs::try_exists(&path).await.unwrap_or(false);
        handle.force_debug(present);
        if shutdown.sleep(interval).await {
            return Ok(());
        }
    }
}
