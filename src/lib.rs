//! Tollgate - Per-key Admission Control
//!
//! This crate decides, per request key (typically a client address), whether
//! a request is admitted. Each key gets a fixed counting window; going over
//! the limit locks the key out for one further interval measured from the
//! offending request.
//!
//! ```
//! use std::time::Duration;
//! use tollgate::ratelimit::RateLimiter;
//!
//! let limiter = RateLimiter::new(2, Duration::from_secs(5)).unwrap();
//! assert!(limiter.allow("10.0.0.1"));
//! assert!(limiter.allow("10.0.0.1"));
//! assert!(!limiter.allow("10.0.0.1"));
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;
