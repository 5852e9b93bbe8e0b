//! Named, independently restartable background tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinSet;

use crate::shutdown::ShutdownSignal;

type TaskFactory = Arc<dyn Fn(ShutdownSignal) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Spawns tasks that are restarted after `restart_delay` whenever they fail,
/// panic or return before shutdown.
pub struct Supervisor {
    tasks: JoinSet<()>,
    shutdown: ShutdownSignal,
    restart_delay: Duration,
}

impl Supervisor {
    pub fn new(shutdown: ShutdownSignal, restart_delay: Duration) -> Self {
        Self {
            tasks: JoinSet::new(),
            shutdown,
            restart_delay,
        }
    }

    pub fn spawn<F, Fut>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(ShutdownSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let factory: TaskFactory = Arc::new(move |signal| Box::pin(factory(signal)));
        let shutdown = self.shutdown.clone();
        let delay = self.restart_delay;
        self.tasks.spawn(supervise(name, factory, shutdown, delay));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task to wind down after shutdown.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!(%err, "supervised task aborted");
            }
        }
    }
}

async fn supervise(
    name: &'static str,
    factory: TaskFactory,
    mut shutdown: ShutdownSignal,
    delay: Duration,
) {
    loop {
        tracing::info!(task = name, "starting task");
        match tokio::spawn(factory(shutdown.clone())).await {
            Ok(Ok(())) if shutdown.is_triggered() => break,
            Ok(Ok(())) => tracing::warn!(task = name, "task exited unexpectedly"),
            Ok(Err(err)) => tracing::error!(task = name, error = %format!("{err:#}"), "task failed"),
            Err(err) if err.is_panic() => tracing::error!(task = name, "task panicked"),
            Err(_) => break,
        }
        if shutdown.sleep(delay).await {
            break;
        }
    }
    tracing::info!(task = name, "task stopped");
}
