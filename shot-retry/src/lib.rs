//! # shot-retry
//!
//! `shot-retry` throttles calls to a rate limited upstream and retries the ones
//! that get pushed back.
//!
//! ## Core Philosophy
//!
//! A client that hammers a throttled API only earns more throttling. `shot-retry`
//! spends a local token budget before every attempt, and when the upstream still
//! answers "slow down" it waits with jittered exponential backoff before trying
//! again, up to a hard retry ceiling.
//!
//! ## Key Concepts
//!
//! * **Token Bucket**: A continuously refilled, capped budget. Tokens are
//!   recalculated lazily at the moment of the request; there is no background
//!   timer.
//! * **Backoff**: Pluggable delay policies. [`ExponentialBackoff`] doubles the
//!   delay per retry, [`AdaptiveBackoff`] also reacts to recent success and
//!   failure streaks.
//! * **One Retry Loop**: [`RateLimiter::run`] is written once against the
//!   [`Sleeper`] trait. Async callers and blocking callers get the same
//!   semantics from [`RateLimiter::execute`] and [`RateLimiter::execute_blocking`].
//! * **Bounded Waits**: Every wait is a sequence of short sleeps, so progress
//!   reports and cancellation take effect promptly and no caller waits forever.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use shot_retry::ExecuteOptions;
//! use shot_retry::RateLimitConfig;
//! use shot_retry::RateLimiter;
//!
//! let config = RateLimitConfig::builder()
//!     .initial_tokens(10.0)
//!     .refill_rate(60.0)
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(10))
//!     .build()
//!     .unwrap();
//! let limiter = RateLimiter::new(config);
//!
//! let mut calls = 0;
//! let value = limiter
//!     .execute_blocking_with(
//!         || {
//!             calls += 1;
//!             if calls < 2 {
//!                 Err("429 Too Many Requests")
//!             } else {
//!                 Ok(calls)
//!             }
//!         },
//!         ExecuteOptions::default().with_tokens(2.0),
//!     )
//!     .unwrap();
//!
//! assert_eq!(value, 2);
//! ```

use std::time::Duration;

mod backoff;
mod config;
mod error;
mod limiter;
mod progress;
mod result;
mod sleeper;
mod sliding_window;
mod state;
mod token_bucket;

pub use backoff::AdaptiveBackoff;
pub use backoff::Backoff;
pub use backoff::BackoffStats;
pub use backoff::ExponentialBackoff;
pub use backoff::MIN_JITTERED_DELAY;
pub use config::AdaptiveConfig;
pub use config::RateLimitConfig;
pub use config::RateLimitConfigBuilder;
pub use error::ConfigError;
pub use error::RetryError;
pub use limiter::DEFAULT_RETRY_INDICATORS;
pub use limiter::ExecuteOptions;
pub use limiter::LimiterStats;
pub use limiter::RateLimiter;
pub use limiter::RetryPredicate;
pub use limiter::is_rate_limit_error;
pub use progress::ProgressCallback;
pub use progress::ProgressPhase;
pub use progress::ProgressUpdate;
pub use result::RetryResult;
pub use result::RetryStatus;
pub use sleeper::Sleeper;
pub use sleeper::ThreadSleeper;
pub use sleeper::TokioSleeper;
pub use sliding_window::SlidingWindowCounter;
pub use state::RetryState;
pub use token_bucket::BucketStats;
pub use token_bucket::TokenBucket;
pub use tokio_util::sync::CancellationToken;

/// Why a request for capacity was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    /// `missing` more units are needed; they are expected after `retry_after`.
    Insufficient { missing: f64, retry_after: Duration },
}
