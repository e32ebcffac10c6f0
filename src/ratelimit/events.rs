//! Decision events and the observers that consume them.
//!
//! The decision engine describes every transition it takes as a
//! [`LimiterEvent`] and hands it to a [`LimiterObserver`] once the store lock
//! has been released. The default [`TracingObserver`] turns events into
//! `tracing` records; [`RecordingObserver`] keeps them for inspection.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

/// A transition taken by the decision engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// First decision for a previously unseen key
    KeyCreated {
        key: String,
        at: DateTime<Utc>,
    },
    /// Rejected because a lockout is still in force
    StillBlocked {
        key: String,
        blocked_until: DateTime<Utc>,
    },
    /// A lockout expired and was cleared
    BlockExpired { key: String },
    /// A full interval passed since the window opened; the count restarted
    WindowReset {
        key: String,
        window_start: DateTime<Utc>,
    },
    /// Admitted
    Allowed {
        key: String,
        count: u64,
        max_count: u64,
    },
    /// Count went over the limit; a lockout began
    Blocked {
        key: String,
        count: u64,
        max_count: u64,
        blocked_until: DateTime<Utc>,
    },
    /// Idle state removed by the eviction hook
    Evicted { key: String },
}

impl LimiterEvent {
    /// The key the event concerns.
    pub fn key(&self) -> &str {
        match self {
            LimiterEvent::KeyCreated { key, .. }
            | LimiterEvent::StillBlocked { key, .. }
            | LimiterEvent::BlockExpired { key }
            | LimiterEvent::WindowReset { key, .. }
            | LimiterEvent::Allowed { key, .. }
            | LimiterEvent::Blocked { key, .. }
            | LimiterEvent::Evicted { key } => key,
        }
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::KeyCreated { key, at } => {
                write!(f, "new key {} observed at {}", key, at)
            }
            LimiterEvent::StillBlocked { key, blocked_until } => {
                write!(f, "key {} is blocked until {}", key, blocked_until)
            }
            LimiterEvent::BlockExpired { key } => write!(f, "key {} block expired", key),
            LimiterEvent::WindowReset { key, .. } => write!(f, "window reset for key {}", key),
            LimiterEvent::Allowed {
                key,
                count,
                max_count,
            } => write!(f, "request allowed for key {} ({}/{})", key, count, max_count),
            LimiterEvent::Blocked {
                key,
                count,
                max_count,
                blocked_until,
            } => write!(
                f,
                "key {} exceeded limit ({}/{}), blocked until {}",
                key, count, max_count, blocked_until
            ),
            LimiterEvent::Evicted { key } => write!(f, "evicted idle key {}", key),
        }
    }
}

/// Receives every event emitted by a limiter.
///
/// Called synchronously on the deciding thread, outside the store lock.
pub trait LimiterObserver: Send + Sync + fmt::Debug {
    fn on_event(&self, event: &LimiterEvent);
}

/// Emits events as structured `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LimiterObserver for TracingObserver {
    fn on_event(&self, event: &LimiterEvent) {
        match event {
            LimiterEvent::KeyCreated { key, at } => {
                debug!(key = %key, at = %at, "New key observed");
            }
            LimiterEvent::StillBlocked { key, blocked_until } => {
                trace!(key = %key, blocked_until = %blocked_until, "Key is blocked");
            }
            LimiterEvent::BlockExpired { key } => {
                debug!(key = %key, "Block expired");
            }
            LimiterEvent::WindowReset { key, window_start } => {
                debug!(key = %key, window_start = %window_start, "Resetting window");
            }
            LimiterEvent::Allowed {
                key,
                count,
                max_count,
            } => {
                debug!(key = %key, count, max_count, "Request allowed");
            }
            LimiterEvent::Blocked {
                key,
                count,
                max_count,
                blocked_until,
            } => {
                info!(
                    key = %key,
                    count,
                    max_count,
                    blocked_until = %blocked_until,
                    "Rate limit exceeded, key blocked"
                );
            }
            LimiterEvent::Evicted { key } => {
                debug!(key = %key, "Evicted idle key");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LimiterObserver for NoopObserver {
    fn on_event(&self, _event: &LimiterEvent) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LimiterEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    pub fn events(&self) -> Vec<LimiterEvent> {
        self.events.lock().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<LimiterEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl LimiterObserver for RecordingObserver {
    fn on_event(&self, event: &LimiterEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        observer.on_event(&LimiterEvent::BlockExpired { key: "a".into() });
        observer.on_event(&LimiterEvent::Evicted { key: "b".into() });

        let events = observer.take();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].key(), "a");
        assert_eq!(events[1].key(), "b");
        assert!(observer.is_empty());
    }

    #[test]
    fn test_event_display() {
        let event = LimiterEvent::Allowed {
            key: "10.0.0.1".into(),
            count: 1,
            max_count: 2,
        };
        assert_eq!(event.to_string(), "request allowed for key 10.0.0.1 (1/2)");
    }

    #[test]
    fn test_tracing_observer_accepts_every_event() {
        let at = DateTime::<Utc>::UNIX_EPOCH;
        let observer = TracingObserver;
        for event in [
            LimiterEvent::KeyCreated { key: "k".into(), at },
            LimiterEvent::StillBlocked {
                key: "k".into(),
                blocked_until: at,
            },
            LimiterEvent::BlockExpired { key: "k".into() },
            LimiterEvent::WindowReset {
                key: "k".into(),
                window_start: at,
            },
            LimiterEvent::Allowed {
                key: "k".into(),
                count: 1,
                max_count: 1,
            },
            LimiterEvent::Blocked {
                key: "k".into(),
                count: 2,
                max_count: 1,
                blocked_until: at,
            },
            LimiterEvent::Evicted { key: "k".into() },
        ] {
            observer.on_event(&event);
        }
    }
}
