use std::sync::Arc;

use shot_retry::CancellationToken;
use shot_retry::RateLimiter;
use tower::BoxError;
use tower::Layer;

use crate::service::RetryLimitService;

pub(crate) type BoxPredicate = Arc<dyn Fn(&BoxError) -> bool + Send + Sync>;

/// Wraps services in a [`RetryLimitService`].
///
/// All services produced by one layer share the same [`RateLimiter`], and so
/// the same token budget and retry history.
#[derive(Clone)]
pub struct RetryLimitLayer {
    limiter: Arc<RateLimiter>,
    tokens: f64,
    retry_on: Option<BoxPredicate>,
    cancellation: Option<CancellationToken>,
}

impl RetryLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            tokens: 1.0,
            retry_on: None,
            cancellation: None,
        }
    }

    /// Tokens each attempt spends. Defaults to `1.0`.
    pub fn with_tokens(mut self, tokens: f64) -> Self {
        self.tokens = tokens;
        self
    }

    /// Decide which inner errors are retried. By default an error is retried
    /// when its message looks like a rate limit response.
    pub fn with_retry_on<F>(mut self, retry_on: F) -> Self
    where
        F: Fn(&BoxError) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Some(Arc::new(retry_on));
        self
    }

    /// Abandon in-flight retries once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl<S> Layer<S> for RetryLimitLayer {
    type Service = RetryLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            tokens: self.tokens,
            retry_on: self.retry_on.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}
