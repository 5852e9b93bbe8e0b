use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cfs_protocol::SessionEvent;
use serde_json::Value;

/// Attempts after which an event becomes eligible for dropping.
pub const MAX_ATTEMPTS: u32 = 10;
/// Elapsed time after which an event becomes eligible for dropping.
pub const MAX_ELAPSED: Duration = Duration::from_secs(600);

pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Publish the event back onto the topic with these attempt fields.
    Republish { attempts: u32, started: f64 },
    /// Give up on the event.
    Drop { attempts: u32, elapsed: Duration },
}

/// Bounded redelivery. An event is only dropped once both the attempt count
/// and the elapsed time since its first failure exceed their limits.
#[derive(Debug, Clone, Copy)]
pub struct EventRetryPolicy {
    pub max_attempts: u32,
    pub max_elapsed: Duration,
}

impl Default for EventRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            max_elapsed: MAX_ELAPSED,
        }
    }
}

impl EventRetryPolicy {
    pub fn decide(&self, event: &SessionEvent, now: f64) -> RetryDecision {
        let attempts = event.attempt_count.unwrap_or(0).saturating_add(1);
        let started = event.attempt_start.unwrap_or(now);
        let elapsed = Duration::try_from_secs_f64((now - started).max(0.0)).unwrap_or(Duration::MAX);
        if attempts > self.max_attempts && elapsed > self.max_elapsed {
            return RetryDecision::Drop { attempts, elapsed };
        }
        RetryDecision::Republish { attempts, started }
    }
}

/// Overwrite the attempt fields of a raw event, leaving every other key as
/// it arrived.
pub fn stamp_attempt(raw: &mut Value, attempts: u32, started: f64) -> bool {
    let Some(object) = raw.as_object_mut() else {
        return false;
    };
    object.insert("attempt_count".into(), Value::from(attempts));
    object.insert("attempt_start".into(), Value::from(started));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_protocol::{EventType, Session};

    fn event(count: Option<u32>, start: Option<f64>) -> SessionEvent {
        let mut event = SessionEvent::new(EventType::Create, Session::new("S"));
        event.attempt_count = count;
        event.attempt_start = start;
        event
    }

    #[test]
    fn first_failure_starts_the_clock() {
        let policy = EventRetryPolicy::default();
        match policy.decide(&event(None, None), 1000.0) {
            RetryDecision::Republish { attempts, started } => {
                assert_eq!(attempts, 1);
                assert_eq!(started, 1000.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn counts_increment_and_start_is_kept() {
        let policy = EventRetryPolicy::default();
        match policy.decide(&event(Some(4), Some(900.0)), 1000.0) {
            RetryDecision::Republish { attempts, started } => {
                assert_eq!(attempts, 5);
                assert_eq!(started, 900.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn many_quick_attempts_are_still_retried() {
        let policy = EventRetryPolicy::default();
        assert!(matches!(
            policy.decide(&event(Some(50), Some(900.0)), 1000.0),
            RetryDecision::Republish { .. }
        ));
    }

    #[test]
    fn few_slow_attempts_are_still_retried() {
        let policy = EventRetryPolicy::default();
        assert!(matches!(
            policy.decide(&event(Some(2), Some(0.0)), 5000.0),
            RetryDecision::Republish { .. }
        ));
    }

    #[test]
    fn exhausted_budget_drops() {
        let policy = EventRetryPolicy::default();
        assert_eq!(
            policy.decide(&event(Some(10), Some(0.0)), 601.0),
            RetryDecision::Drop {
                attempts: 11,
                elapsed: Duration::from_secs(601),
            }
        );
    }

    #[test]
    fn limits_are_strict() {
        let policy = EventRetryPolicy::default();
        assert!(matches!(
            policy.decide(&event(Some(10), Some(0.0)), 600.0),
            RetryDecision::Republish { .. }
        ));
        assert!(matches!(
            policy.decide(&event(Some(9), Some(0.0)), 601.0),
            RetryDecision::Republish { .. }
        ));
    }

    #[test]
    fn saturated_count_does_not_overflow() {
        let policy = EventRetryPolicy::default();
        assert!(matches!(
            policy.decide(&event(Some(u32::MAX), Some(900.0)), 1000.0),
            RetryDecision::Republish { attempts: u32::MAX, .. }
        ));
    }

    #[test]
    fn absurd_start_time_counts_as_forever() {
        let policy = EventRetryPolicy::default();
        assert_eq!(
            policy.decide(&event(Some(20), Some(-1.0e300)), 1000.0),
            RetryDecision::Drop {
                attempts: 21,
                elapsed: Duration::MAX,
            }
        );
    }

    #[test]
    fn stamping_keeps_unknown_keys() {
        let mut raw = serde_json::json!({
            "type": "CREATE",
            "data": {"name": "S", "status": {"session": {"start_time": "t0"}}},
            "trace": "abc",
            "attempt_count": 3
        });
        assert!(stamp_attempt(&mut raw, 4, 12.5));
        assert_eq!(raw["attempt_count"], 4);
        assert_eq!(raw["attempt_start"], 12.5);
        assert_eq!(raw["trace"], "abc");
        assert_eq!(raw["data"]["status"]["session"]["start_time"], "t0");
        assert!(!stamp_attempt(&mut Value::Null, 1, 0.0));
    }
}
