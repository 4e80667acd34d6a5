//! # Tower Shot Retry
//!
//! `tower-shot-retry` puts a [`shot_retry::RateLimiter`] in front of any
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! Each request is retried with jittered exponential backoff when the inner
//! service answers with a rate limit error, and every attempt spends tokens
//! from a budget shared by all services built from the same
//! [`RetryLimitLayer`].
//!
//! ## Error Mapping
//!
//! Errors the inner service returns that are not retried come back unchanged.
//! Failures of the retry machinery itself (an empty token budget, exhausted
//! retries or cancellation) are reported as a [`ShotError`] inside the
//! returned [`tower::BoxError`].
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use shot_retry::RateLimitConfig;
//! use shot_retry::RateLimiter;
//! use tower::ServiceBuilder;
//! use tower::ServiceExt;
//! use tower::service_fn;
//! use tower_shot_retry::RetryLimitLayer;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
//! let svc = ServiceBuilder::new()
//!     .layer(RetryLimitLayer::new(limiter))
//!     .service(service_fn(|name: &'static str| async move {
//!         Ok::<_, tower::BoxError>(format!("hello {name}"))
//!     }));
//!
//! assert_eq!(svc.oneshot("world").await.unwrap(), "hello world");
//! # }
//! ```

mod error;
mod layer;
mod service;


pub use error::ShotError;
pub use layer::RetryLimitLayer;
pub use service::RetryLimitService;
