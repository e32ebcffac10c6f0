//! Core rate limiter implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::clock::{Clock, SystemClock};
use super::events::{LimiterEvent, LimiterObserver, TracingObserver};
use super::state::LimiterState;
use super::store::{StateStore, StoreKind};
use crate::config::LimiterConfig;
use crate::error::{Result, TollgateError};

/// The outcome of a single admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests counted in the key's window after this call
    pub count: u64,
    /// Configured maximum per window
    pub max_count: u64,
    /// End of the lockout, when the request was rejected
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Read-only projection of one key's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub key: String,
    pub request_count: u64,
    pub max_count: u64,
    pub blocked: bool,
    pub blocked_until: Option<DateTime<Utc>>,
    /// Milliseconds since the current window opened
    pub window_age_ms: i64,
}

impl fmt::Display for KeyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Key: {}", self.key)?;
        writeln!(f, "Request Count: {}/{}", self.request_count, self.max_count)?;
        writeln!(f, "Blocked: {}", self.blocked)?;
        match self.blocked_until {
            Some(until) => writeln!(f, "Block Expires: {}", until)?,
            None => writeln!(f, "Block Expires: never")?,
        }
        write!(f, "Time in Window: {:.3}s", self.window_age_ms as f64 / 1000.0)
    }
}

/// Per-key fixed-window limiter with a punitive lockout.
///
/// Each key may be admitted `max_count` times per window. The call that goes
/// over the limit locks the key out for one full `interval` from that call,
/// independently of when the window itself would have reset.
///
/// Every decision for a key runs under the store's exclusive access to that
/// key, so concurrent calls behave like some sequential ordering of them.
pub struct RateLimiter {
    max_count: u64,
    interval: Duration,
    window: chrono::Duration,
    store: Box<dyn StateStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn LimiterObserver>,
}

/// Builder for [`RateLimiter`] with non-default collaborators.
pub struct RateLimiterBuilder {
    max_count: u64,
    interval: Duration,
    store: StoreKind,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn LimiterObserver>,
}

impl RateLimiterBuilder {
    /// Use `clock` as the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send decision events to `observer`.
    pub fn observer(mut self, observer: Arc<dyn LimiterObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Choose the state store.
    pub fn store(mut self, store: StoreKind) -> Self {
        self.store = store;
        self
    }

    /// Validate the configuration and build the limiter.
    pub fn build(self) -> Result<RateLimiter> {
        if self.max_count == 0 {
            return Err(TollgateError::Config(
                "max_count must be greater than zero".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(TollgateError::Config(
                "interval must be greater than zero".to_string(),
            ));
        }
        let window = chrono::Duration::from_std(self.interval).map_err(|e| {
            TollgateError::Config(format!("interval {:?} is out of range: {}", self.interval, e))
        })?;

        Ok(RateLimiter {
            max_count: self.max_count,
            interval: self.interval,
            window,
            store: self.store.build(),
            clock: self.clock,
            observer: self.observer,
        })
    }
}

impl RateLimiter {
    /// Create a limiter admitting `max_count` requests per `interval` for
    /// each key, using the system clock and a single-lock store.
    pub fn new(max_count: u64, interval: Duration) -> Result<Self> {
        Self::builder(max_count, interval).build()
    }

    /// Start building a limiter with custom collaborators.
    pub fn builder(max_count: u64, interval: Duration) -> RateLimiterBuilder {
        RateLimiterBuilder {
            max_count,
            interval,
            store: StoreKind::default(),
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Create a limiter from its configuration section.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        Self::builder(config.max_count, config.interval())
            .store(config.store)
            .build()
    }

    /// Decide whether to admit a request for `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }

    /// Decide whether to admit a request for `key`, reporting the key's
    /// count and lockout alongside the verdict.
    pub fn check(&self, key: &str) -> Decision {
        let now = self.clock.now();
        let mut events = Vec::with_capacity(3);
        let mut decision = Decision {
            allowed: false,
            count: 0,
            max_count: self.max_count,
            blocked_until: None,
        };

        self.store.with_state(key, now, &mut |state, created| {
            if created {
                events.push(LimiterEvent::KeyCreated {
                    key: key.to_string(),
                    at: now,
                });
            }
            decision = self.transition(state, now, &mut events);
        });

        for event in &events {
            self.observer.on_event(event);
        }
        decision
    }

    /// Apply one decision to `state`. Order matters: block check, then
    /// window reset, then count.
    fn transition(
        &self,
        state: &mut LimiterState,
        now: DateTime<Utc>,
        events: &mut Vec<LimiterEvent>,
    ) -> Decision {
        let mut block_expired = false;
        if state.blocked {
            match state.blocked_until {
                Some(until) if now < until => {
                    events.push(LimiterEvent::StillBlocked {
                        key: state.key().to_string(),
                        blocked_until: until,
                    });
                    return Decision {
                        allowed: false,
                        count: state.request_count,
                        max_count: self.max_count,
                        blocked_until: Some(until),
                    };
                }
                _ => {
                    state.blocked = false;
                    block_expired = true;
                    events.push(LimiterEvent::BlockExpired {
                        key: state.key().to_string(),
                    });
                }
            }
        }

        // A lockout always outlasts the window it began in, so an expired
        // block implies a stale window even when the two end together.
        if block_expired || state.window_age(now) > self.window {
            state.request_count = 0;
            state.window_start = now;
            events.push(LimiterEvent::WindowReset {
                key: state.key().to_string(),
                window_start: now,
            });
        }

        state.request_count = state.request_count.saturating_add(1);

        if state.request_count > self.max_count {
            let until = now
                .checked_add_signed(self.window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            state.blocked = true;
            state.blocked_until = Some(until);
            events.push(LimiterEvent::Blocked {
                key: state.key().to_string(),
                count: state.request_count,
                max_count: self.max_count,
                blocked_until: until,
            });
            return Decision {
                allowed: false,
                count: state.request_count,
                max_count: self.max_count,
                blocked_until: Some(until),
            };
        }

        events.push(LimiterEvent::Allowed {
            key: state.key().to_string(),
            count: state.request_count,
            max_count: self.max_count,
        });
        Decision {
            allowed: true,
            count: state.request_count,
            max_count: self.max_count,
            blocked_until: None,
        }
    }

    /// Structured stats for `key`, or `None` if it has never been seen.
    ///
    /// Never creates state.
    pub fn snapshot(&self, key: &str) -> Option<KeyStats> {
        let state = self.store.get(key)?;
        let now = self.clock.now();
        Some(KeyStats {
            key: state.key().to_string(),
            request_count: state.request_count(),
            max_count: self.max_count,
            blocked: state.is_blocked(),
            blocked_until: state.blocked_until(),
            window_age_ms: state.window_age(now).num_milliseconds(),
        })
    }

    /// Human-readable stats for `key`.
    pub fn stats(&self, key: &str) -> String {
        match self.snapshot(key) {
            Some(stats) => stats.to_string(),
            None => format!("No data for key: {}", key),
        }
    }

    /// Remove keys whose window opened more than `retention` ago and that
    /// are not under an active lockout. Returns how many were removed.
    ///
    /// `retention` must be at least one interval; a removed key then decides
    /// exactly as it would have had it been kept.
    pub fn evict_idle(&self, retention: Duration) -> Result<usize> {
        if retention < self.interval {
            return Err(TollgateError::Config(format!(
                "retention {:?} is shorter than the limiter interval {:?}",
                retention, self.interval
            )));
        }
        let retention = chrono::Duration::from_std(retention).map_err(|e| {
            TollgateError::Config(format!("retention {:?} is out of range: {}", retention, e))
        })?;

        let now = self.clock.now();
        let removed = self
            .store
            .retain(&mut |state| state.is_blocking_at(now) || state.window_age(now) <= retention);

        for key in &removed {
            self.observer.on_event(&LimiterEvent::Evicted { key: key.clone() });
        }
        Ok(removed.len())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Forget every key.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_count", &self.max_count)
            .field("interval", &self.interval)
            .field("keys", &self.store.len())
            .field("clock", &self.clock)
            .field("observer", &self.observer)
            .finish()
    }
}
