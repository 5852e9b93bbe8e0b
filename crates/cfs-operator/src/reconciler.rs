//! Periodic full-state reconciliation.
//!
//! Each run compares execution units against sessions and derives corrective
//! actions. An action only runs when the same key was also seen by the
//! previous run, so divergences that resolve within one interval (usually a
//! live event still in flight) are never acted on. Actions go through the
//! same handlers as live events.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cfs_protocol::job::component_selector;
use cfs_protocol::{ExecutionUnit, Session, SessionFilter, SessionState, label_value};

use crate::adapters::{JobScheduler, SessionStore};
use crate::controller::{Origin, SessionController};
use crate::error::OperatorError;
use crate::monitor::JobMonitor;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    /// A unit whose session is gone.
    Delete,
    /// A unit whose session never recorded it.
    Adopt,
    /// A session that never got a unit recorded.
    Create,
    /// A running session whose unit already finished.
    Complete,
}

/// Debounce key: `(kind, resource id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey {
    pub kind: ActionKind,
    pub id: String,
}

impl ActionKey {
    fn new(kind: ActionKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ActionKind::Delete => "delete",
            ActionKind::Adopt => "adopt",
            ActionKind::Create => "create",
            ActionKind::Complete => "complete",
        };
        write!(f, "{kind}:{}", self.id)
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    DeleteUnit { job: String, session: String },
    AdoptUnit { job: String, session: Session },
    CreateJob(Session),
    CompleteSession(Session),
}

/// Derive the divergences between observed units and sessions.
pub fn plan(units: &[ExecutionUnit], sessions: &[Session]) -> BTreeMap<ActionKey, Action> {
    let by_label: HashMap<String, &Session> = sessions
        .iter()
        .map(|session| (label_value(&session.name), session))
        .collect();
    let mut actions = BTreeMap::new();
    let mut covered = HashSet::new();

    for unit in units {
        let owner = unit.session_label().unwrap_or_default();
        let Some(session) = by_label.get(owner) else {
            actions.insert(
                ActionKey::new(ActionKind::Delete, unit.name()),
                Action::DeleteUnit {
                    job: unit.name().to_string(),
                    session: owner.to_string(),
                },
            );
            continue;
        };

        match session.state() {
            SessionState::Pending if session.job_id().is_none() => {
                if covered.insert(session.name.clone()) {
                    actions.insert(
                        ActionKey::new(ActionKind::Adopt, unit.name()),
                        Action::AdoptUnit {
                            job: unit.name().to_string(),
                            session: (*session).clone(),
                        },
                    );
                }
            }
            SessionState::Running if unit.is_terminal() => {
                covered.insert(session.name.clone());
                actions.insert(
                    ActionKey::new(ActionKind::Complete, &session.name),
                    Action::CompleteSession((*session).clone()),
                );
            }
            _ => {}
        }
    }

    for session in sessions {
        if session.job_id().is_none() && !session.is_complete() && !covered.contains(&session.name) {
            actions.insert(
                ActionKey::new(ActionKind::Create, &session.name),
                Action::CreateJob(session.clone()),
            );
        }
    }
    actions
}

pub struct Reconciler {
    sessions: Arc<dyn SessionStore>,
    scheduler: Arc<dyn JobScheduler>,
    controller: Arc<SessionController>,
    monitor: Arc<JobMonitor>,
    previous: Mutex<HashSet<ActionKey>>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        scheduler: Arc<dyn JobScheduler>,
        controller: Arc<SessionController>,
        monitor: Arc<JobMonitor>,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            scheduler,
            controller,
            monitor,
            previous: Mutex::new(HashSet::new()),
            interval,
        }
    }

    /// One reconciliation pass. Returns the number of actions executed. The
    /// remembered keys are only replaced when both listings succeed.
    pub async fn run_once(&self) -> Result<usize, OperatorError> {
        let units = self.scheduler.list_jobs(&component_selector()).await?;
        let sessions = self.sessions.list_sessions(&SessionFilter::all()).await?;
        let planned = plan(&units, &sessions);

        let previous = std::mem::take(&mut *self.previous.lock().unwrap());
        let mut current = HashSet::new();
        let mut executed = 0;
        for (key, action) in planned {
            if previous.contains(&key) {
                tracing::info!(action = %key, "handling missed event");
                self.execute(action).await;
                executed += 1;
            } else {
                tracing::debug!(action = %key, "divergence detected; waiting for confirmation");
                current.insert(key);
            }
        }
        *self.previous.lock().unwrap() = current;
        Ok(executed)
    }

    async fn execute(&self, action: Action) {
        match action {
            Action::DeleteUnit { job, session } => {
                let mut orphan = Session::new(session);
                orphan.status.session.job = Some(job);
                self.controller.handle_delete(&orphan, Origin::Reconciler).await;
            }
            Action::AdoptUnit { job, session } => {
                if let Err(err) = self.controller.handle_adopt(&session, &job, Origin::Reconciler).await {
                    tracing::warn!(session = %session.name, job = %job, %err, "replayed adoption failed");
                }
            }
            Action::CreateJob(session) => {
                if let Err(err) = self.controller.handle_create(&session, Origin::Reconciler).await {
                    tracing::warn!(session = %session.name, %err, "replayed create failed");
                }
            }
            Action::CompleteSession(session) => {
                if let Err(err) = self.monitor.reconcile_session(&session).await {
                    tracing::warn!(session = %session.name, %err, "replayed completion failed");
                }
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        tracing::info!("starting session reconciliation loop");
        loop {
            if shutdown.sleep(self.interval).await {
                return Ok(());
            }
            match self.run_once().await {
                Ok(0) => {}
                Ok(executed) => tracing::info!(executed, "reconciliation pass complete"),
                Err(err) => tracing::warn!(%err, "reconciliation pass failed"),
            }
        }
    }
}
