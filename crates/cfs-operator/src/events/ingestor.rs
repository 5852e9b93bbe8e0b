use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cfs_protocol::SessionEvent;
use serde_json::Value;

use super::retry::{EventRetryPolicy, RetryDecision, epoch_seconds, stamp_attempt};
use crate::adapters::{Delivery, EventBus};
use crate::error::OperatorError;
use crate::liveness::Timestamp;
use crate::shutdown::ShutdownSignal;

/// Something that acts on one decoded session event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &SessionEvent) -> Result<(), OperatorError>;
}

/// What became of one delivery. Every variant is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// The session is gone; retrying cannot help.
    NotFound,
    Retried,
    Dropped,
    Malformed,
}

/// Sequential consumer: decode, handle, retry or drop, then commit.
pub struct EventIngestor {
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    policy: EventRetryPolicy,
    pause: Duration,
    timestamp: Option<Timestamp>,
}

impl EventIngestor {
    pub fn new(bus: Arc<dyn EventBus>, handler: Arc<dyn EventHandler>, pause: Duration) -> Self {
        Self {
            bus,
            handler,
            policy: EventRetryPolicy::default(),
            pause,
            timestamp: None,
        }
    }

    pub fn with_policy(mut self, policy: EventRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Refresh this timestamp on every delivery.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Process one delivery and commit it. A failure to republish a retry
    /// is returned without committing so the delivery is seen again.
    pub async fn process(&self, delivery: &Delivery) -> Result<Disposition, OperatorError> {
        let disposition = self.dispatch(delivery).await?;
        self.bus.commit(delivery).await?;
        Ok(disposition)
    }

    async fn dispatch(&self, delivery: &Delivery) -> Result<Disposition, OperatorError> {
        let mut raw: Value = match serde_json::from_slice(&delivery.payload) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(offset = delivery.offset, %err, "event payload is not valid JSON");
                return Ok(Disposition::Malformed);
            }
        };
        let event: SessionEvent = match serde_json::from_value(raw.clone()) {
            Ok(event) => event,
            Err(err) => {
                let event_type = raw.get("type").cloned().unwrap_or_default();
                tracing::warn!(
                    offset = delivery.offset,
                    %event_type,
                    %err,
                    "unrecognised session event"
                );
                return Ok(Disposition::Malformed);
            }
        };

        tracing::info!(
            session = %event.session_name(),
            event_type = ?event.event_type,
            attempt = event.attempt_count.unwrap_or(0),
            "event received"
        );
        let err = match self.handler.handle(&event).await {
            Ok(()) => return Ok(Disposition::Handled),
            Err(err) => err,
        };
        if err.is_not_found() {
            tracing::warn!(session = %event.session_name(), %err, "session no longer exists; not retrying");
            return Ok(Disposition::NotFound);
        }

        tracing::error!(session = %event.session_name(), %err, "event handling failed");
        match self.policy.decide(&event, epoch_seconds()) {
            RetryDecision::Republish { attempts, started } => {
                if !stamp_attempt(&mut raw, attempts, started) {
                    return Err(OperatorError::InvalidEvent("event is not a JSON object".into()));
                }
                let payload = serde_json::to_vec(&raw)
                    .map_err(|err| OperatorError::InvalidEvent(err.to_string()))?;
                self.bus.publish(&payload).await?;
                tracing::info!(
                    session = %event.session_name(),
                    attempt = attempts,
                    "event queued for retry"
                );
                tokio::time::sleep(self.pause).await;
                Ok(Disposition::Retried)
            }
            RetryDecision::Drop { attempts, elapsed } => {
                tracing::warn!(
                    session = %event.session_name(),
                    attempts,
                    elapsed_secs = elapsed.as_secs(),
                    "event exceeded its retry budget; dropping"
                );
                Ok(Disposition::Dropped)
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        tracing::info!("event ingestor started");
        loop {
            let delivery = tokio::select! {
                delivery = self.bus.next() => delivery?,
                _ = shutdown.wait() => return Ok(()),
            };
            if let Some(timestamp) = &self.timestamp {
                timestamp.beat();
            }
            self.process(&delivery).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use crate::testing::FakeBus;
    use cfs_protocol::{EventType, Session};
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    #[derive(Clone, Copy)]
    enum Outcome {
        Succeed,
        NotFound,
        Fail,
    }

    struct ScriptedHandler {
        outcome: Mutex<Outcome>,
        seen: Mutex<Vec<SessionEvent>>,
    }

    impl ScriptedHandler {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(outcome),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn set(&self, outcome: Outcome) {
            *self.outcome.lock().unwrap() = outcome;
        }

        fn seen(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EventHandler for ScriptedHandler {
        async fn handle(&self, event: &SessionEvent) -> Result<(), OperatorError> {
            self.seen.lock().unwrap().push(event.clone());
            match *self.outcome.lock().unwrap() {
                Outcome::Succeed => Ok(()),
                Outcome::NotFound => Err(OperatorError::NotFound("404 session".into())),
                Outcome::Fail => Err(OperatorError::Cfs("503 unavailable".into())),
            }
        }
    }

    fn ingestor(bus: &Arc<FakeBus>, handler: &Arc<ScriptedHandler>) -> EventIngestor {
        EventIngestor::new(bus.clone(), handler.clone(), Duration::ZERO)
    }

    fn payload(event: &SessionEvent) -> Vec<u8> {
        serde_json::to_vec(event).unwrap()
    }

    fn create(name: &str) -> SessionEvent {
        SessionEvent::new(EventType::Create, Session::new(name))
    }

    #[tokio::test]
    async fn handled_events_are_committed() {
        let bus = Arc::new(FakeBus::default());
        let handler = ScriptedHandler::new(Outcome::Succeed);
        let delivery = bus.push(payload(&create("S")));

        let result = ingestor(&bus, &handler).process(&delivery).await.unwrap();
        assert_eq!(result, Disposition::Handled);
        assert_eq!(bus.commits(), vec![delivery.offset]);
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn failed_events_are_redelivered_with_incremented_count() {
        let bus = Arc::new(FakeBus::default());
        let handler = ScriptedHandler::new(Outcome::Fail);
        let ingestor = ingestor(&bus, &handler);
        let first = bus.push(payload(&create("S")));

        assert_eq!(ingestor.process(&first).await.unwrap(), Disposition::Retried);
        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["attempt_count"], 1);
        assert_eq!(published[0]["type"], "CREATE");
        assert_eq!(published[0]["data"]["name"], "S");

        let again = bus.push(serde_json::to_vec(&published[0]).unwrap());
        assert_eq!(ingestor.process(&again).await.unwrap(), Disposition::Retried);
        assert_eq!(bus.published()[1]["attempt_count"], 2);
        assert_eq!(
            bus.published()[1]["attempt_start"],
            published[0]["attempt_start"]
        );

        handler.set(Outcome::Succeed);
        let last = bus.push(serde_json::to_vec(&bus.published()[1]).unwrap());
        assert_eq!(ingestor.process(&last).await.unwrap(), Disposition::Handled);
        assert_eq!(bus.commits(), vec![0, 1, 2]);
        assert_eq!(handler.seen(), 3);
    }

    #[tokio::test]
    async fn redelivery_preserves_fields_it_does_not_model() {
        let bus = Arc::new(FakeBus::default());
        let handler = ScriptedHandler::new(Outcome::Fail);
        let delivery = bus.push(
            br#"{"type":"CREATE","source":"cfs-api","data":{"name":"S","extra":[1,2],"status":{"session":{"start_time":"t0","succeeded":"none"}}}}"#.to_vec(),
        );

        let result = ingestor(&bus, &handler).process(&delivery).await.unwrap();
        assert_eq!(result, Disposition::Retried);
        let published = &bus.published()[0];
        assert_eq!(published["attempt_count"], 1);
        assert!(published["attempt_start"].is_f64());
        assert_eq!(published["source"], "cfs-api");
        assert_eq!(published["data"]["extra"], serde_json::json!([1, 2]));
        assert_eq!(published["data"]["status"]["session"]["start_time"], "t0");
        assert!(published["data"]["status"]["session"].get("startTime").is_none());
    }

    #[tokio::test]
    async fn exhausted_events_are_dropped_for_good() {
        let bus = Arc::new(FakeBus::default());
        let handler = ScriptedHandler::new(Outcome::Fail);
        let mut event = create("S");
        event.attempt_count = Some(10);
        event.attempt_start = Some(epoch_seconds() - 700.0);
        let delivery = bus.push(payload(&event));

        let result = ingestor(&bus, &handler).process(&delivery).await.unwrap();
        assert_eq!(result, Disposition::Dropped);
        assert!(bus.published().is_empty());
        assert_eq!(bus.commits(), vec![delivery.offset]);
    }

    #[tokio::test]
    async fn not_found_is_never_retried() {
        let bus = Arc::new(FakeBus::default());
        let handler = ScriptedHandler::new(Outcome::NotFound);
        let delivery = bus.push(payload(&create("gone")));

        let result = ingestor(&bus, &handler).process(&delivery).await.unwrap();
        assert_eq!(result, Disposition::NotFound);
        assert!(bus.published().is_empty());
        assert_eq!(bus.commits(), vec![delivery.offset]);
    }

    #[tokio::test]
    async fn malformed_payloads_are_committed_without_handling() {
        let bus = Arc::new(FakeBus::default());
        let handler = ScriptedHandler::new(Outcome::Succeed);
        let ingestor = ingestor(&bus, &handler);
        let garbage = bus.push(b"{not json".to_vec());
        let unknown = bus.push(br#"{"type":"UPDATE","data":{"name":"S"}}"#.to_vec());
        let untyped = bus.push(br#"{"data":{"name":"S"}}"#.to_vec());

        assert_eq!(ingestor.process(&garbage).await.unwrap(), Disposition::Malformed);
        assert_eq!(ingestor.process(&unknown).await.unwrap(), Disposition::Malformed);
        assert_eq!(ingestor.process(&untyped).await.unwrap(), Disposition::Malformed);
        assert_eq!(handler.seen(), 0);
        assert_eq!(bus.commits(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_republish_leaves_delivery_uncommitted() {
        let bus = Arc::new(FakeBus::default());
        bus.fail_publish.store(true, Ordering::SeqCst);
        let handler = ScriptedHandler::new(Outcome::Fail);
        let delivery = bus.push(payload(&create("S")));

        let err = ingestor(&bus, &handler).process(&delivery).await.unwrap_err();
        assert!(matches!(err, OperatorError::Bus(_)));
        assert!(bus.commits().is_empty());
    }

    #[tokio::test]
    async fn run_consumes_in_order_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let timestamp = Timestamp::new(dir.path().join("timestamp"));
        let bus = Arc::new(FakeBus::default());
        let handler = ScriptedHandler::new(Outcome::Succeed);
        bus.push(payload(&create("a")));
        bus.push(payload(&create("b")));

        let shutdown = Shutdown::new();
        let ingestor = Arc::new(ingestor(&bus, &handler).with_timestamp(timestamp.clone()));
        let task = tokio::spawn(ingestor.run(shutdown.signal()));

        for _ in 0..200 {
            if bus.commits().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.trigger();
        task.await.unwrap().unwrap();

        assert_eq!(bus.commits(), vec![0, 1]);
        let names: Vec<String> = handler
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.data.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(timestamp.is_alive(Duration::from_secs(20)));
    }
}
