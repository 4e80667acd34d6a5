use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use shot_retry::CancellationToken;
use shot_retry::ExecuteOptions;
use shot_retry::RateLimiter;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

use crate::error::into_box_error;
use crate::layer::BoxPredicate;

/// Runs each request through a shared [`RateLimiter`].
///
/// Every attempt spends tokens, waits for the inner service to be ready and
/// calls it with a fresh clone of the request.
pub struct RetryLimitService<S> {
    pub(crate) inner: S,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) tokens: f64,
    pub(crate) retry_on: Option<BoxPredicate>,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl<S: Clone> Clone for RetryLimitService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            tokens: self.tokens,
            retry_on: self.retry_on.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<S> RetryLimitService<S> {
    fn options(&self) -> ExecuteOptions<BoxError> {
        let mut options = ExecuteOptions::new().with_tokens(self.tokens);
        if let Some(retry_on) = &self.retry_on {
            let retry_on = Arc::clone(retry_on);
            options = options.with_retry_on(move |err: &BoxError| retry_on(err));
        }
        if let Some(token) = &self.cancellation {
            options = options.with_cancellation(token.clone());
        }
        options
    }
}

impl<S, Req> Service<Req> for RetryLimitService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Clone + Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);
        let options = self.options();

        Box::pin(async move {
            let operation = move || {
                let mut svc = inner.clone();
                let req = req.clone();
                async move {
                    let ready = svc.ready().await.map_err(Into::<BoxError>::into)?;
                    ready.call(req).await.map_err(Into::<BoxError>::into)
                }
            };

            limiter
                .execute_with(operation, options)
                .await
                .map_err(|err| {
                    tracing::debug!(error = %err, "request failed after rate limited retries");
                    into_box_error(err)
                })
        })
    }
}
