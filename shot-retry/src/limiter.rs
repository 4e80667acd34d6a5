use std::fmt;
use std::fmt::Display;
use std::future::Future;
use std::future::ready;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::AdaptiveBackoff;
use crate::Backoff;
use crate::BackoffStats;
use crate::BucketStats;
use crate::ExponentialBackoff;
use crate::ProgressCallback;
use crate::ProgressPhase;
use crate::ProgressUpdate;
use crate::RateLimitConfig;
use crate::Reason;
use crate::RetryError;
use crate::RetryResult;
use crate::RetryState;
use crate::Sleeper;
use crate::ThreadSleeper;
use crate::TokioSleeper;
use crate::progress::emit;
use crate::token_bucket::Reservoir;

/// Lower-cased fragments that mark an error message as a transient rate limit.
pub const DEFAULT_RETRY_INDICATORS: [&str; 6] = [
    "rate limit",
    "too many requests",
    "429",
    "throttled",
    "quota exceeded",
    "retry",
];

/// Shortest sleep issued while waiting on tokens or backing off.
const MIN_WAIT_SLICE: Duration = Duration::from_millis(1);

/// Longest gap between backoff progress updates.
const MAX_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// The default retry predicate: a case-insensitive match of the error's
/// message against [`DEFAULT_RETRY_INDICATORS`].
pub fn is_rate_limit_error<E: Display + ?Sized>(error: &E) -> bool {
    let message = error.to_string().to_lowercase();
    DEFAULT_RETRY_INDICATORS
        .iter()
        .any(|indicator| message.contains(indicator))
}

/// Decides whether an operation error deserves another attempt.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Per-call settings for [`RateLimiter::execute_with`] and friends.
pub struct ExecuteOptions<E> {
    tokens: f64,
    on_progress: Option<ProgressCallback>,
    retry_on: Option<RetryPredicate<E>>,
    cancellation: Option<CancellationToken>,
}

impl<E> Default for ExecuteOptions<E> {
    fn default() -> Self {
        Self {
            tokens: 1.0,
            on_progress: None,
            retry_on: None,
            cancellation: None,
        }
    }
}

impl<E> Clone for ExecuteOptions<E> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens,
            on_progress: self.on_progress.clone(),
            retry_on: self.retry_on.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<E> fmt::Debug for ExecuteOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("tokens", &self.tokens)
            .field("on_progress", &self.on_progress.is_some())
            .field("retry_on", &self.retry_on.is_some())
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

impl<E> ExecuteOptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens each attempt must acquire. Defaults to `1.0`.
    pub fn with_tokens(mut self, tokens: f64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Replace the default [`is_rate_limit_error`] classification.
    pub fn with_retry_on<F>(mut self, retry_on: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Some(Arc::new(retry_on));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn is_retryable(&self, error: &E) -> bool
    where
        E: Display,
    {
        match &self.retry_on {
            Some(retry_on) => retry_on(error),
            None => is_rate_limit_error(error),
        }
    }
}

/// Read-only snapshot returned by [`RateLimiter::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStats {
    pub retry_count: u32,
    pub total_requests: u64,
    pub total_retries: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub token_bucket: BucketStats,
    pub backoff: BackoffStats,
}

#[derive(Clone, Debug)]
struct LimiterMetrics {
    attempts: Counter<u64>,
    retries: Counter<u64>,
    token_waits: Counter<u64>,
    outcomes: Counter<u64>,
}

impl LimiterMetrics {
    fn new() -> Self {
        let meter = global::meter("shot_retry");
        Self {
            attempts: meter.u64_counter("attempts").build(),
            retries: meter.u64_counter("retries").build(),
            token_waits: meter.u64_counter("token_waits").build(),
            outcomes: meter.u64_counter("outcomes").build(),
        }
    }
}

/// Everything the limiter's lock protects.
#[derive(Debug)]
struct Shared {
    bucket: Reservoir,
    state: RetryState,
}

impl Shared {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            bucket: Reservoir::new(config, now),
            state: RetryState::new(),
        }
    }
}

enum TokenWait {
    Acquired,
    Cancelled,
    Exceeded { available: f64 },
}

/// Throttles and retries arbitrary operations.
///
/// Each attempt first takes tokens from the limiter's bucket, waiting in
/// bounded slices when the bucket is short, then sleeps for the backoff delay
/// owed by earlier failures, then runs the operation. Retryable failures loop
/// until [`Backoff::should_retry`] refuses, so an operation runs at most
/// `max_retries + 1` times per call.
///
/// The limiter is safe to share between concurrent callers. Token and retry
/// bookkeeping happen under one short-lived lock that is never held while the
/// operation runs or while a caller sleeps. Waiting callers are not queued
/// fairly; whoever polls first after a refill wins.
///
/// ```rust
/// use shot_retry::RateLimitConfig;
/// use shot_retry::RateLimiter;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = RateLimiter::new(RateLimitConfig::default());
///
/// let value = limiter
///     .execute(|| async { Ok::<_, std::io::Error>(42) })
///     .await
///     .unwrap();
/// assert_eq!(value, 42);
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    backoff: Box<dyn Backoff>,
    clock: Clock,
    shared: Mutex<Shared>,
    instruments: LimiterMetrics,
}

impl RateLimiter {
    /// A limiter with plain [`ExponentialBackoff`].
    pub fn new(config: RateLimitConfig) -> Self {
        let config = Arc::new(config);
        let clock = Clock::new();
        Self {
            backoff: Box::new(ExponentialBackoff::new(Arc::clone(&config))),
            shared: Mutex::new(Shared::new(&config, clock.now())),
            clock,
            config,
            instruments: LimiterMetrics::new(),
        }
    }

    /// A limiter with [`AdaptiveBackoff`].
    pub fn adaptive(config: RateLimitConfig) -> Self {
        Self::new(config).with_adaptive(true)
    }

    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        let config = Arc::clone(&self.config);
        self.backoff = if adaptive {
            Box::new(AdaptiveBackoff::new(config))
        } else {
            Box::new(ExponentialBackoff::new(config))
        };
        self
    }

    /// Use `clock` for refill arithmetic. Restarts the bucket full.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.shared = Mutex::new(Shared::new(&self.config, clock.now()));
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn available_tokens(&self) -> f64 {
        let now = self.clock.now();
        self.shared.lock().bucket.available(now)
    }

    /// Run `operation` on the tokio timer with default options.
    ///
    /// # Errors
    ///
    /// See [`RetryError`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_with(operation, ExecuteOptions::default())
            .await
    }

    /// Run `operation` on the tokio timer.
    ///
    /// # Errors
    ///
    /// See [`RetryError`].
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        operation: F,
        options: ExecuteOptions<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run(&TokioSleeper, operation, &options)
            .await
            .into_result()
    }

    /// Run a synchronous `operation`, sleeping the calling thread between
    /// attempts. Must not be called from inside an async runtime worker.
    ///
    /// # Errors
    ///
    /// See [`RetryError`].
    pub fn execute_blocking<F, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
    {
        self.execute_blocking_with(operation, ExecuteOptions::default())
    }

    /// Blocking counterpart of [`execute_with`](Self::execute_with).
    ///
    /// # Errors
    ///
    /// See [`RetryError`].
    pub fn execute_blocking_with<F, T, E>(
        &self,
        mut operation: F,
        options: ExecuteOptions<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
    {
        futures::executor::block_on(self.run(&ThreadSleeper, || ready(operation()), &options))
            .into_result()
    }

    /// The retry loop, parameterized by how to wait.
    ///
    /// Every other `execute*` method is a thin adapter over this one. Use it
    /// directly to plug in another scheduler, or to inspect the full
    /// [`RetryResult`].
    pub async fn run<S, F, Fut, T, E>(
        &self,
        sleeper: &S,
        mut operation: F,
        options: &ExecuteOptions<E>,
    ) -> RetryResult<T, E>
    where
        S: Sleeper,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let tokens = options.tokens;
        let mut attempts = 0u32;
        let mut total_delay = Duration::ZERO;
        let mut tokens_consumed = 0.0;

        loop {
            if options.is_cancelled() {
                return self.conclude(
                    Err(RetryError::Cancelled { attempts }),
                    attempts,
                    total_delay,
                    tokens_consumed,
                );
            }

            let acquired = {
                let now = self.clock.now();
                let mut shared = self.shared.lock();
                shared.state.record_request();
                shared.bucket.try_consume(tokens, now)
            };

            if let ControlFlow::Break(reason) = acquired {
                match self.wait_for_tokens(sleeper, tokens, reason, options).await {
                    TokenWait::Acquired => {}
                    TokenWait::Cancelled => {
                        return self.conclude(
                            Err(RetryError::Cancelled { attempts }),
                            attempts,
                            total_delay,
                            tokens_consumed,
                        );
                    }
                    TokenWait::Exceeded { available } => {
                        tracing::warn!(
                            requested = tokens,
                            available,
                            attempts,
                            "token budget exceeded"
                        );
                        return self.conclude(
                            Err(RetryError::TokenBudgetExceeded {
                                requested: tokens,
                                available,
                            }),
                            attempts,
                            total_delay,
                            tokens_consumed,
                        );
                    }
                }
            }
            tokens_consumed += tokens;

            let delay = {
                let mut shared = self.shared.lock();
                let delay = self.backoff.calculate_delay(&shared.state);
                shared.state.last_delay = delay;
                delay
            };
            if !delay.is_zero() {
                tracing::warn!(
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "delaying rate limited retry"
                );
                if !self.backoff_wait(sleeper, delay, options).await {
                    return self.conclude(
                        Err(RetryError::Cancelled { attempts }),
                        attempts,
                        total_delay,
                        tokens_consumed,
                    );
                }
                total_delay += delay;
            }

            if options.is_cancelled() {
                return self.conclude(
                    Err(RetryError::Cancelled { attempts }),
                    attempts,
                    total_delay,
                    tokens_consumed,
                );
            }

            attempts += 1;
            self.instruments.attempts.add(1, &[]);

            let error = match operation().await {
                Ok(value) => {
                    self.backoff.reset(&mut self.shared.lock().state);
                    tracing::debug!(attempts, ?total_delay, "rate limited call succeeded");
                    return self.conclude(Ok(value), attempts, total_delay, tokens_consumed);
                }
                Err(error) => error,
            };

            if !options.is_retryable(&error) {
                tracing::debug!(attempt = attempts, %error, "non-retryable failure");
                return self.conclude(
                    Err(RetryError::Operation(error)),
                    attempts,
                    total_delay,
                    tokens_consumed,
                );
            }

            let retrying = {
                let mut shared = self.shared.lock();
                // The local bound keeps the per-call ceiling even when another
                // caller's success resets the shared retry count.
                if self.backoff.should_retry(&shared.state) && attempts <= self.config.max_retries()
                {
                    shared.state.record_retry();
                    true
                } else {
                    shared.state.record_exhausted();
                    false
                }
            };

            if !retrying {
                tracing::info!(
                    attempts,
                    total_delay_ms = total_delay.as_millis() as u64,
                    %error,
                    "rate limit retries exhausted"
                );
                return self.conclude(
                    Err(RetryError::RateLimitExhausted {
                        attempts,
                        total_delay,
                        last_error: error,
                    }),
                    attempts,
                    total_delay,
                    tokens_consumed,
                );
            }

            self.instruments.retries.add(1, &[]);
            tracing::warn!(attempt = attempts, %error, "rate limited attempt failed; retrying");
        }
    }

    async fn wait_for_tokens<S, E>(
        &self,
        sleeper: &S,
        tokens: f64,
        reason: Reason,
        options: &ExecuteOptions<E>,
    ) -> TokenWait
    where
        S: Sleeper,
    {
        let timeout = self.config.max_delay();
        let (satisfiable, mut available) = {
            let shared = self.shared.lock();
            (
                shared.bucket.satisfiable_within(tokens, timeout),
                shared.bucket.tokens(),
            )
        };
        if !satisfiable {
            return TokenWait::Exceeded { available };
        }

        self.instruments.token_waits.add(1, &[]);
        tracing::debug!(requested = tokens, available, "waiting for tokens");

        let Reason::Insufficient {
            mut retry_after, ..
        } = reason;
        let mut waited = Duration::ZERO;

        loop {
            let remaining = timeout.saturating_sub(waited);
            if remaining.is_zero() {
                return TokenWait::Exceeded { available };
            }
            if options.is_cancelled() {
                return TokenWait::Cancelled;
            }
            if let Some(on_progress) = &options.on_progress {
                let update = self.progress_update(
                    ProgressPhase::WaitingForTokens,
                    remaining,
                    Some("Waiting for tokens".to_string()),
                );
                emit(on_progress, &update);
            }

            let slice = self
                .config
                .token_poll_interval()
                .min(remaining)
                .min(retry_after.max(MIN_WAIT_SLICE));
            sleeper.sleep(slice).await;
            waited += slice;

            let step = {
                let now = self.clock.now();
                let mut shared = self.shared.lock();
                let step = shared.bucket.try_consume(tokens, now);
                available = shared.bucket.tokens();
                step
            };
            match step {
                ControlFlow::Continue(()) => return TokenWait::Acquired,
                ControlFlow::Break(Reason::Insufficient {
                    retry_after: next, ..
                }) => retry_after = next,
            }
        }
    }

    /// Sleep for `delay` in slices, reporting progress between them.
    ///
    /// Returns `false` if cancelled part way.
    async fn backoff_wait<S, E>(
        &self,
        sleeper: &S,
        delay: Duration,
        options: &ExecuteOptions<E>,
    ) -> bool
    where
        S: Sleeper,
    {
        let slice = MAX_PROGRESS_INTERVAL
            .min(delay / 10)
            .max(MIN_WAIT_SLICE);
        let mut waited = Duration::ZERO;

        while waited < delay {
            if options.is_cancelled() {
                return false;
            }
            let remaining = delay - waited;
            if let Some(on_progress) = &options.on_progress {
                let percent = (waited.as_secs_f64() / delay.as_secs_f64() * 100.0) as u32;
                let update = self.progress_update(
                    ProgressPhase::Backoff,
                    remaining,
                    Some(format!("Backoff {percent}%")),
                );
                emit(on_progress, &update);
            }

            let step = slice.min(remaining);
            sleeper.sleep(step).await;
            waited += step;
        }
        true
    }

    fn progress_update(
        &self,
        phase: ProgressPhase,
        delay: Duration,
        message: Option<String>,
    ) -> ProgressUpdate {
        let now = self.clock.now();
        let (retry_count, tokens_remaining) = {
            let mut shared = self.shared.lock();
            (shared.state.retry_count, shared.bucket.available(now))
        };
        let max_attempts = self.config.max_retries();
        ProgressUpdate {
            attempt: retry_count,
            max_attempts,
            delay,
            tokens_remaining,
            estimated_wait: self
                .backoff
                .estimate_total_wait(max_attempts.saturating_sub(retry_count)),
            phase,
            message,
        }
    }

    fn conclude<T, E>(
        &self,
        outcome: Result<T, RetryError<E>>,
        attempts: u32,
        total_delay: Duration,
        tokens_consumed: f64,
    ) -> RetryResult<T, E> {
        let result = RetryResult::new(outcome, attempts, total_delay, tokens_consumed);
        self.instruments
            .outcomes
            .add(1, &[KeyValue::new("status", result.status().as_str())]);
        result
    }

    pub fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let mut shared = self.shared.lock();
        let token_bucket = shared.bucket.stats(now);
        let state = &shared.state;
        LimiterStats {
            retry_count: state.retry_count,
            total_requests: state.total_requests,
            total_retries: state.total_retries,
            consecutive_successes: state.consecutive_successes,
            consecutive_failures: state.consecutive_failures,
            token_bucket,
            backoff: self.backoff.stats(state),
        }
    }

    /// A copy of the current retry bookkeeping.
    pub fn state(&self) -> RetryState {
        self.shared.lock().state.clone()
    }

    /// Refill the bucket and forget all retry history.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut shared = self.shared.lock();
        shared.bucket.reset(now);
        shared.state = RetryState::new();
    }
}
