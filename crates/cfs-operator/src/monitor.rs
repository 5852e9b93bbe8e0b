//! Job state monitor.
//!
//! Tracks sessions whose execution unit is in flight, polls each unit and
//! advances the session through `pending -> running -> complete`. Completed
//! sessions leave the tracked set. The set is periodically resynchronised from
//! the session store so restarts and missed events are covered, and an hourly
//! sweep deletes execution units no session refers to.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use cfs_protocol::job::component_selector;
use cfs_protocol::{Session, SessionFilter, SessionState, SessionStatusPatch, Succeeded};
use chrono::DateTime;

use crate::adapters::{JobScheduler, SessionStore};
use crate::config::LoopTimings;
use crate::error::OperatorError;
use crate::shutdown::ShutdownSignal;

pub struct JobMonitor {
    sessions: Arc<dyn SessionStore>,
    scheduler: Arc<dyn JobScheduler>,
    tracked: Mutex<HashMap<String, Session>>,
    timings: LoopTimings,
}

/// Normalise a scheduler timestamp to naive UTC (`2024-01-01T00:00:00`).
pub fn format_time(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(time) => time.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        Err(_) => raw.to_string(),
    }
}

impl JobMonitor {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        scheduler: Arc<dyn JobScheduler>,
        timings: LoopTimings,
    ) -> Self {
        Self {
            sessions,
            scheduler,
            tracked: Mutex::new(HashMap::new()),
            timings,
        }
    }

    pub fn track(&self, session: Session) {
        tracing::debug!(session = %session.name, "tracking session");
        self.tracked
            .lock()
            .unwrap()
            .insert(session.name.clone(), session);
    }

    pub fn untrack(&self, name: &str) {
        self.tracked.lock().unwrap().remove(name);
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.tracked.lock().unwrap().contains_key(name)
    }

    pub fn tracked_names(&self) -> Vec<String> {
        self.tracked.lock().unwrap().keys().cloned().collect()
    }

    /// Add incomplete sessions that have a job and are not yet tracked.
    pub async fn sync_sessions(&self) -> Result<usize, OperatorError> {
        let sessions = self.sessions.list_sessions(&SessionFilter::all()).await?;
        let mut tracked = self.tracked.lock().unwrap();
        let mut added = 0;
        for session in sessions {
            if session.job_id().is_some()
                && !session.is_complete()
                && !tracked.contains_key(&session.name)
            {
                tracked.insert(session.name.clone(), session);
                added += 1;
            }
        }
        if added > 0 {
            tracing::info!(added, "resynchronised tracked sessions");
        }
        Ok(added)
    }

    /// One pass over a snapshot of the tracked set.
    pub async fn poll_once(&self) {
        let names = self.tracked_names();
        for name in names {
            match self.check(&name).await {
                Ok(true) => self.untrack(&name),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(session = %name, %err, "unable to check session");
                }
            }
        }
    }

    async fn check(&self, name: &str) -> Result<bool, OperatorError> {
        let session = match self.sessions.get_session(name).await {
            Ok(session) => session,
            Err(err) if err.is_not_found() => {
                tracing::warn!(session = %name, "monitored session can no longer be found");
                return Ok(true);
            }
            Err(err) => return Err(err),
        };
        self.advance(&session).await
    }

    /// Advance one session from its unit's observed state. Returns `true` once
    /// the session is terminal.
    pub async fn advance(&self, session: &Session) -> Result<bool, OperatorError> {
        let name = session.name.as_str();
        if session.is_complete() {
            return Ok(true);
        }

        let Some(job_id) = session.job_id() else {
            tracing::warn!(session = %name, "no job recorded for monitored session; invalid state");
            self.sessions
                .patch_session_status(name, &SessionStatusPatch::complete(Succeeded::Unknown, None))
                .await?;
            return Ok(true);
        };

        let unit = match self.scheduler.get_job(job_id).await {
            Ok(unit) => unit,
            Err(err) if err.is_not_found() => {
                tracing::warn!(session = %name, job = %job_id, "job was deleted before its outcome was known");
                self.sessions
                    .patch_session_status(name, &SessionStatusPatch::complete(Succeeded::Unknown, None))
                    .await?;
                return Ok(true);
            }
            Err(err) => return Err(err),
        };

        if let Some(start) = &unit.status.start_time {
            if session.state() == SessionState::Pending {
                tracing::info!(session = %name, job = %job_id, "job started");
                let patch = SessionStatusPatch::running(Some(format_time(start)));
                self.sessions.patch_session_status(name, &patch).await?;
                if let Some(tracked) = self.tracked.lock().unwrap().get_mut(name) {
                    patch.apply_to(&mut tracked.status.session);
                }
            }
        }

        if let Some(done) = &unit.status.completion_time {
            tracing::info!(session = %name, job = %job_id, "job complete");
            self.sessions
                .patch_session_status(
                    name,
                    &SessionStatusPatch::complete(Succeeded::True, Some(format_time(done))),
                )
                .await?;
            return Ok(true);
        }

        if unit.has_failed() {
            tracing::info!(session = %name, job = %job_id, "job failed");
            let failed_at = unit.failure_time().map(format_time);
            self.sessions
                .patch_session_status(name, &SessionStatusPatch::complete(Succeeded::False, failed_at))
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Drive one session outside the poll loop, dropping it from tracking
    /// once terminal.
    pub async fn reconcile_session(&self, session: &Session) -> Result<(), OperatorError> {
        if self.advance(session).await? {
            self.untrack(&session.name);
        }
        Ok(())
    }

    /// Delete execution units no session refers to.
    pub async fn cleanup_orphans(&self) -> Result<usize, OperatorError> {
        let units = self.scheduler.list_jobs(&component_selector()).await?;
        let sessions = self.sessions.list_sessions(&SessionFilter::all()).await?;
        let referenced: HashSet<String> = sessions
            .iter()
            .filter_map(|session| session.job_id().map(str::to_string))
            .collect();

        let mut removed = 0;
        let mut seen = HashSet::new();
        for unit in units {
            let name = unit.name().to_string();
            if referenced.contains(&name) || !seen.insert(name.clone()) {
                continue;
            }
            match self.scheduler.delete_job(&name).await {
                Ok(()) => removed += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => tracing::warn!(job = %name, %err, "failed to delete orphaned job"),
            }
        }
        if removed > 0 {
            tracing::info!(removed, "cleanup removed orphaned jobs");
        }
        Ok(removed)
    }

    /// Initial sync, retried until it succeeds or shutdown is requested.
    pub async fn initial_sync(&self, mut shutdown: ShutdownSignal) {
        loop {
            match self.sync_sessions().await {
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(%err, "initial session sync failed");
                }
            }
            if shutdown.sleep(self.timings.initial_sync_retry).await {
                return;
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let mut intervals = 0u32;
        loop {
            self.poll_once().await;
            intervals += 1;
            if intervals >= self.timings.resync_every {
                intervals = 0;
                if let Err(err) = self.sync_sessions().await {
                    tracing::warn!(%err, "session resync failed");
                }
            }
            if shutdown.sleep(self.timings.poll_interval).await {
                return Ok(());
            }
        }
    }

    pub async fn run_cleanup(self: Arc<Self>, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.cleanup_orphans().await {
                tracing::warn!(%err, "orphaned job cleanup failed");
            }
            if shutdown.sleep(self.timings.orphan_sweep_interval).await {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeScheduler, FakeSessions, failed_unit, session, session_with_job, unit};

    fn monitor(sessions: &Arc<FakeSessions>, scheduler: &Arc<FakeScheduler>) -> JobMonitor {
        JobMonitor::new(sessions.clone(), scheduler.clone(), LoopTimings::default())
    }

    #[test]
    fn times_lose_their_offset() {
        assert_eq!(format_time("2024-03-01T10:20:30Z"), "2024-03-01T10:20:30");
        assert_eq!(format_time("2024-03-01T10:20:30+02:00"), "2024-03-01T08:20:30");
        assert_eq!(format_time("garbage"), "garbage");
    }

    #[tokio::test]
    async fn start_then_completion_walks_the_state_machine() {
        let s = session_with_job("S", "J", SessionState::Pending);
        let sessions = Arc::new(FakeSessions::with([s.clone()]));
        let scheduler = Arc::new(FakeScheduler::with([unit("J", "S")]));
        let monitor = monitor(&sessions, &scheduler);
        monitor.track(s);

        monitor.poll_once().await;
        assert!(monitor.is_tracked("S"));
        assert!(sessions.patches_for("S").is_empty());

        scheduler.update("J", |status| status.start_time = Some("2024-01-01T00:00:01Z".into()));
        monitor.poll_once().await;
        let stored = sessions.get("S").unwrap();
        assert_eq!(stored.state(), SessionState::Running);
        assert_eq!(stored.status.session.start_time.as_deref(), Some("2024-01-01T00:00:01"));
        assert!(monitor.is_tracked("S"));

        // A second poll while running issues no further patches.
        monitor.poll_once().await;
        assert_eq!(sessions.patches_for("S").len(), 1);

        scheduler.update("J", |status| {
            status.completion_time = Some("2024-01-01T00:09:00Z".into())
        });
        monitor.poll_once().await;
        let stored = sessions.get("S").unwrap();
        assert_eq!(stored.state(), SessionState::Complete);
        assert_eq!(stored.status.session.succeeded, Succeeded::True);
        assert_eq!(
            stored.status.session.completion_time.as_deref(),
            Some("2024-01-01T00:09:00")
        );
        assert!(!monitor.is_tracked("S"));
    }

    #[tokio::test]
    async fn failed_unit_records_first_condition_time() {
        let s = session_with_job("S", "J", SessionState::Running);
        let sessions = Arc::new(FakeSessions::with([s.clone()]));
        let scheduler = Arc::new(FakeScheduler::with([failed_unit("J", "S", "2024-01-01T00:05:00Z")]));
        let monitor = monitor(&sessions, &scheduler);
        monitor.track(s);

        monitor.poll_once().await;
        let stored = sessions.get("S").unwrap();
        assert_eq!(stored.state(), SessionState::Complete);
        assert_eq!(stored.status.session.succeeded, Succeeded::False);
        assert_eq!(
            stored.status.session.completion_time.as_deref(),
            Some("2024-01-01T00:05:00")
        );
        assert!(!monitor.is_tracked("S"));
    }

    #[tokio::test]
    async fn vanished_unit_completes_as_unknown() {
        let s = session_with_job("S", "J", SessionState::Pending);
        let sessions = Arc::new(FakeSessions::with([s.clone()]));
        let scheduler = Arc::new(FakeScheduler::default());
        let monitor = monitor(&sessions, &scheduler);
        monitor.track(s);

        monitor.poll_once().await;
        let stored = sessions.get("S").unwrap();
        assert_eq!(stored.state(), SessionState::Complete);
        assert_eq!(stored.status.session.succeeded, Succeeded::Unknown);
        assert!(!monitor.is_tracked("S"));
    }

    #[tokio::test]
    async fn session_without_job_is_completed_defensively() {
        let s = session("S");
        let sessions = Arc::new(FakeSessions::with([s.clone()]));
        let scheduler = Arc::new(FakeScheduler::default());
        let monitor = monitor(&sessions, &scheduler);
        monitor.track(s);

        monitor.poll_once().await;
        assert_eq!(sessions.get("S").unwrap().state(), SessionState::Complete);
        assert!(!monitor.is_tracked("S"));
    }

    #[tokio::test]
    async fn deleted_session_leaves_tracking() {
        let sessions = Arc::new(FakeSessions::default());
        let scheduler = Arc::new(FakeScheduler::with([unit("J", "S")]));
        let monitor = monitor(&sessions, &scheduler);
        monitor.track(session_with_job("S", "J", SessionState::Pending));

        monitor.poll_once().await;
        assert!(!monitor.is_tracked("S"));
    }

    #[tokio::test]
    async fn completed_sessions_leave_within_one_poll() {
        let done = session_with_job("done", "J1", SessionState::Complete);
        let live = session_with_job("live", "J2", SessionState::Running);
        let sessions = Arc::new(FakeSessions::with([done.clone(), live.clone()]));
        let scheduler = Arc::new(FakeScheduler::with([unit("J1", "done"), unit("J2", "live")]));
        let monitor = monitor(&sessions, &scheduler);
        monitor.track(done);
        monitor.track(live);

        monitor.poll_once().await;
        assert!(!monitor.is_tracked("done"));
        assert!(monitor.is_tracked("live"));
        assert!(sessions.patches_for("done").is_empty());
    }

    #[tokio::test]
    async fn one_failing_session_does_not_block_others() {
        let a = session_with_job("a", "Ja", SessionState::Pending);
        let b = session_with_job("b", "Jb", SessionState::Pending);
        let sessions = Arc::new(FakeSessions::with([a.clone(), b.clone()]));
        let mut finished = unit("Jb", "b");
        finished.status.completion_time = Some("2024-01-01T00:00:00Z".into());
        let scheduler = Arc::new(FakeScheduler::with([unit("Ja", "a"), finished]));
        let monitor = monitor(&sessions, &scheduler);
        monitor.track(a);
        monitor.track(b);
        scheduler.update("Ja", |status| status.start_time = Some("2024-01-01T00:00:00Z".into()));
        sessions.fail_patch.store(true, std::sync::atomic::Ordering::SeqCst);

        monitor.poll_once().await;
        assert!(monitor.is_tracked("a"));
        assert!(monitor.is_tracked("b"));

        sessions.fail_patch.store(false, std::sync::atomic::Ordering::SeqCst);
        monitor.poll_once().await;
        assert!(monitor.is_tracked("a"));
        assert!(!monitor.is_tracked("b"));
    }

    #[tokio::test]
    async fn sync_adds_only_incomplete_untracked_sessions_with_jobs() {
        let sessions = Arc::new(FakeSessions::with([
            session_with_job("a", "Ja", SessionState::Pending),
            session_with_job("b", "Jb", SessionState::Complete),
            session("c"),
            session_with_job("d", "Jd", SessionState::Running),
        ]));
        let scheduler = Arc::new(FakeScheduler::default());
        let monitor = monitor(&sessions, &scheduler);
        monitor.track(session_with_job("d", "Jd", SessionState::Running));

        assert_eq!(monitor.sync_sessions().await.unwrap(), 1);
        let mut names = monitor.tracked_names();
        names.sort();
        assert_eq!(names, vec!["a", "d"]);
    }

    #[tokio::test]
    async fn orphan_sweep_deletes_unreferenced_units_once() {
        let sessions = Arc::new(FakeSessions::with([session_with_job(
            "a",
            "Ja",
            SessionState::Running,
        )]));
        let mut foreign = unit("other", "x");
        foreign.metadata.labels.clear();
        let scheduler = Arc::new(FakeScheduler::with([
            unit("Ja", "a"),
            unit("Jgone", "gone"),
            foreign,
        ]));
        let monitor = monitor(&sessions, &scheduler);

        assert_eq!(monitor.cleanup_orphans().await.unwrap(), 1);
        assert_eq!(scheduler.deleted(), vec!["Jgone"]);
        let mut remaining = scheduler.job_names();
        remaining.sort();
        assert_eq!(remaining, vec!["Ja", "other"]);
    }
}
