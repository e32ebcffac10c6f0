//! Background eviction of idle keys.
//!
//! The limiter never forgets a key on its own. [`spawn_sweeper`] runs
//! [`RateLimiter::evict_idle`] on a fixed cadence so long-lived processes
//! don't accumulate state for every key they have ever seen.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;
use crate::error::{Result, TollgateError};

/// Handle to a running sweeper. Dropping it stops the sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper. Calling this more than once is harmless.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Eviction sweeper stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Evict keys idle for longer than `retention` every `every`.
///
/// Must be called from within a tokio runtime. `retention` has to cover at
/// least one limiter interval.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    retention: Duration,
    every: Duration,
) -> Result<SweeperHandle> {
    if every.is_zero() {
        return Err(TollgateError::Config(
            "sweep interval must be greater than zero".to_string(),
        ));
    }
    if retention < limiter.interval() {
        return Err(TollgateError::Config(format!(
            "retention {:?} is shorter than the limiter interval {:?}",
            retention,
            limiter.interval()
        )));
    }

    info!(
        retention_ms = retention.as_millis() as u64,
        every_ms = every.as_millis() as u64,
        "Starting eviction sweeper"
    );

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match limiter.evict_idle(retention) {
                Ok(0) => {}
                Ok(removed) => debug!(removed, remaining = limiter.len(), "Evicted idle keys"),
                Err(e) => {
                    warn!(error = %e, "Eviction sweep failed, stopping sweeper");
                    break;
                }
            }
        }
    });

    Ok(SweeperHandle { task: Some(task) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn limiter() -> (Arc<RateLimiter>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = RateLimiter::builder(1, Duration::from_secs(1))
            .clock(clock.clone())
            .build()
            .unwrap();
        (Arc::new(limiter), clock)
    }

    #[tokio::test]
    async fn test_sweeper_evicts_idle_keys() {
        let (limiter, clock) = limiter();
        limiter.allow("a");
        limiter.allow("b");
        clock.advance(chrono::Duration::seconds(10));

        let _handle = spawn_sweeper(
            limiter.clone(),
            Duration::from_secs(2),
            Duration::from_millis(10),
        )
        .unwrap();

        for _ in 0..100 {
            if limiter.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_keeps_recent_keys() {
        let (limiter, _clock) = limiter();
        limiter.allow("a");

        let _handle = spawn_sweeper(
            limiter.clone(),
            Duration::from_secs(2),
            Duration::from_millis(5),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (limiter, clock) = limiter();
        let mut handle = spawn_sweeper(
            limiter.clone(),
            Duration::from_secs(2),
            Duration::from_millis(5),
        )
        .unwrap();
        assert!(handle.is_running());

        handle.stop();
        handle.stop();
        assert!(!handle.is_running());

        limiter.allow("a");
        clock.advance(chrono::Duration::seconds(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_settings() {
        let (limiter, _clock) = limiter();

        assert!(spawn_sweeper(limiter.clone(), Duration::from_secs(2), Duration::ZERO).is_err());
        assert!(spawn_sweeper(
            limiter,
            Duration::from_millis(500),
            Duration::from_millis(5)
        )
        .is_err());
    }
}
