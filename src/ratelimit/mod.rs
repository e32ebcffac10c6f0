//! Rate limiting logic and state management.

mod clock;
mod events;
mod limiter;
mod state;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{LimiterEvent, LimiterObserver, NoopObserver, RecordingObserver, TracingObserver};
pub use limiter::{Decision, KeyStats, RateLimiter, RateLimiterBuilder};
pub use state::LimiterState;
pub use store::{ShardedStore, SingleLockStore, StateStore, StoreKind};
pub use sweeper::{spawn_sweeper, SweeperHandle};
