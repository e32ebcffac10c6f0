//! Per-key limiter state.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Mutable admission state tracked for a single key.
///
/// Created on the first decision for a key and updated in place on every
/// later one. The store never hands this out without its lock held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterState {
    /// The key this state belongs to
    key: String,
    /// Start of the current counting window
    pub(crate) window_start: DateTime<Utc>,
    /// Admissions counted in the current window, including the call that
    /// triggered a block
    pub(crate) request_count: u64,
    /// Whether a lockout is active
    pub(crate) blocked: bool,
    /// When the most recent lockout ends. Left in place after it expires.
    pub(crate) blocked_until: Option<DateTime<Utc>>,
}

impl LimiterState {
    /// Create a fresh state whose window opens at `now`.
    pub fn new(key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            window_start: now,
            request_count: 0,
            blocked: false,
            blocked_until: None,
        }
    }

    /// The key this state tracks.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn blocked_until(&self) -> Option<DateTime<Utc>> {
        self.blocked_until
    }

    /// Whether a lockout is in force at `now`.
    ///
    /// A block whose expiry has passed but has not yet been cleared by a
    /// decision counts as lifted.
    pub fn is_blocking_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked && self.blocked_until.map_or(false, |until| now < until)
    }

    /// Time elapsed since the current window opened.
    pub fn window_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.window_start
    }
}
