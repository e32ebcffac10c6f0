//! Key to state storage.
//!
//! Both stores hand the decision engine exclusive access to one key's state
//! for the duration of a closure, so every read-modify-write of a key is
//! atomic. [`SingleLockStore`] serializes all keys on one lock;
//! [`ShardedStore`] only serializes keys that hash to the same shard.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::state::LimiterState;

/// Which [`StateStore`] implementation backs a limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// One exclusive lock around the whole map
    #[default]
    Single,
    /// Per-shard locks keyed by a hash of the key
    Sharded,
}

impl StoreKind {
    /// Construct an empty store of this kind.
    pub fn build(self) -> Box<dyn StateStore> {
        match self {
            StoreKind::Single => Box::new(SingleLockStore::new()),
            StoreKind::Sharded => Box::new(ShardedStore::new()),
        }
    }
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(StoreKind::Single),
            "sharded" => Ok(StoreKind::Sharded),
            other => Err(format!("unknown store kind '{}'", other)),
        }
    }
}

/// Storage for per-key limiter state.
pub trait StateStore: Send + Sync {
    /// Run `f` against the state for `key`, creating it with its window
    /// opening at `now` if the key has never been seen.
    ///
    /// The second argument to `f` is `true` when the state was created by
    /// this call. No other call touches the same key while `f` runs.
    fn with_state(
        &self,
        key: &str,
        now: DateTime<Utc>,
        f: &mut dyn FnMut(&mut LimiterState, bool),
    );

    /// Copy out the state for `key` without creating it.
    fn get(&self, key: &str) -> Option<LimiterState>;

    /// Drop every state for which `keep` returns `false`, returning the
    /// removed keys.
    fn retain(&self, keep: &mut dyn FnMut(&LimiterState) -> bool) -> Vec<String>;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every key.
    fn clear(&self);
}

/// A single `RwLock<HashMap>` guarding every key.
///
/// Decisions take the write lock; reads for stats share the read lock.
#[derive(Debug, Default)]
pub struct SingleLockStore {
    states: RwLock<HashMap<String, LimiterState>>,
}

impl SingleLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for SingleLockStore {
    fn with_state(
        &self,
        key: &str,
        now: DateTime<Utc>,
        f: &mut dyn FnMut(&mut LimiterState, bool),
    ) {
        let mut states = self.states.write();
        // Avoid allocating the owned key on the hot path for known keys.
        if let Some(state) = states.get_mut(key) {
            f(state, false);
            return;
        }
        let state = states
            .entry(key.to_string())
            .or_insert_with(|| LimiterState::new(key, now));
        f(state, true);
    }

    fn get(&self, key: &str) -> Option<LimiterState> {
        self.states.read().get(key).cloned()
    }

    fn retain(&self, keep: &mut dyn FnMut(&LimiterState) -> bool) -> Vec<String> {
        let mut states = self.states.write();
        let mut removed = Vec::new();
        states.retain(|key, state| {
            let kept = keep(state);
            if !kept {
                removed.push(key.clone());
            }
            kept
        });
        removed
    }

    fn len(&self) -> usize {
        self.states.read().len()
    }

    fn clear(&self) {
        self.states.write().clear();
    }
}

/// A [`DashMap`] of states; each key lives in exactly one shard.
#[derive(Debug, Default)]
pub struct ShardedStore {
    states: DashMap<String, LimiterState>,
}

impl ShardedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for ShardedStore {
    fn with_state(
        &self,
        key: &str,
        now: DateTime<Utc>,
        f: &mut dyn FnMut(&mut LimiterState, bool),
    ) {
        if let Some(mut state) = self.states.get_mut(key) {
            f(state.value_mut(), false);
            return;
        }
        // Another caller may have inserted between the lookup and here; the
        // entry API settles that under the shard's write lock.
        let mut created = false;
        let mut state = self.states.entry(key.to_string()).or_insert_with(|| {
            created = true;
            LimiterState::new(key, now)
        });
        f(state.value_mut(), created);
    }

    fn get(&self, key: &str) -> Option<LimiterState> {
        self.states.get(key).map(|state| state.value().clone())
    }

    fn retain(&self, keep: &mut dyn FnMut(&LimiterState) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        self.states.retain(|key, state| {
            let kept = keep(state);
            if !kept {
                removed.push(key.clone());
            }
            kept
        });
        removed
    }

    fn len(&self) -> usize {
        self.states.len()
    }

    fn clear(&self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> Vec<Box<dyn StateStore>> {
        vec![StoreKind::Single.build(), StoreKind::Sharded.build()]
    }

    #[test]
    fn test_with_state_creates_once() {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        for store in stores() {
            let mut created_flags = Vec::new();
            for _ in 0..3 {
                store.with_state("a", now, &mut |state, created| {
                    state.request_count += 1;
                    created_flags.push(created);
                });
            }

            assert_eq!(created_flags, vec![true, false, false]);
            assert_eq!(store.len(), 1);
            assert_eq!(store.get("a").map(|s| s.request_count()), Some(3));
        }
    }

    #[test]
    fn test_get_does_not_create() {
        for store in stores() {
            assert!(store.get("missing").is_none());
            assert!(store.is_empty());
        }
    }

    #[test]
    fn test_retain_reports_removed_keys() {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        for store in stores() {
            for key in ["a", "b", "c"] {
                store.with_state(key, now, &mut |state, _| {
                    if state.key() == "b" {
                        state.blocked = true;
                    }
                });
            }

            let mut removed = store.retain(&mut |state| state.is_blocked());
            removed.sort();

            assert_eq!(removed, vec!["a".to_string(), "c".to_string()]);
            assert_eq!(store.len(), 1);
            assert!(store.get("b").is_some());
        }
    }

    #[test]
    fn test_clear() {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        for store in stores() {
            store.with_state("a", now, &mut |_, _| {});
            store.clear();
            assert_eq!(store.len(), 0);
        }
    }

    #[test]
    fn test_store_kind_from_str() {
        assert_eq!("single".parse::<StoreKind>(), Ok(StoreKind::Single));
        assert_eq!("Sharded".parse::<StoreKind>(), Ok(StoreKind::Sharded));
        assert!("ring".parse::<StoreKind>().is_err());
    }
}
