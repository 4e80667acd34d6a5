use std::ops::ControlFlow;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;
use serde::Serialize;

use crate::ConfigError;
use crate::RateLimitConfig;
use crate::Reason;

/// Point-in-time view of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketStats {
    pub capacity: f64,
    pub tokens_available: f64,
    /// Tokens per minute.
    pub refill_rate: f64,
    /// Fraction of capacity currently spent, in `0.0..=1.0`.
    pub utilization: f64,
}

/// Refill and debit arithmetic, without any locking.
///
/// Callers supply `now` so that several reservoirs, or a reservoir and other
/// state, can be updated under a single lock with a single clock read.
#[derive(Debug, Clone)]
pub(crate) struct Reservoir {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    max_wait: Duration,
    last_refill: Instant,
}

impl Reservoir {
    pub(crate) fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            capacity: config.initial_tokens(),
            tokens: config.initial_tokens(),
            refill_per_sec: config.refill_per_second(),
            max_wait: config.max_delay(),
            last_refill: now,
        }
    }

    pub(crate) fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        if self.refill_per_sec > 0.0 {
            let added = elapsed.as_secs_f64() * self.refill_per_sec;
            self.tokens = (self.tokens + added).min(self.capacity);
        }
        self.last_refill = now;
    }

    pub(crate) fn try_consume(&mut self, tokens: f64, now: Instant) -> ControlFlow<Reason> {
        self.refill(now);
        if tokens >= 0.0 && tokens <= self.tokens {
            self.tokens = (self.tokens - tokens).max(0.0);
            ControlFlow::Continue(())
        } else {
            let missing = if tokens >= 0.0 {
                tokens - self.tokens
            } else {
                0.0
            };
            ControlFlow::Break(Reason::Insufficient {
                missing,
                retry_after: self
                    .time_to_refill(missing)
                    .map_or(self.max_wait, |wait| wait.min(self.max_wait)),
            })
        }
    }

    /// Time until `missing` more tokens accumulate, or `None` if they never will.
    pub(crate) fn time_to_refill(&self, missing: f64) -> Option<Duration> {
        if missing <= 0.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_per_sec <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(missing / self.refill_per_sec).ok()
    }

    /// Whether `tokens` could ever be granted within `within`, ignoring competing callers.
    pub(crate) fn satisfiable_within(&self, tokens: f64, within: Duration) -> bool {
        if !(tokens >= 0.0 && tokens <= self.capacity) {
            return false;
        }
        self.time_to_refill(tokens - self.tokens)
            .is_some_and(|wait| wait <= within)
    }

    pub(crate) fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    pub(crate) fn tokens(&self) -> f64 {
        self.tokens
    }

    pub(crate) fn capacity(&self) -> f64 {
        self.capacity
    }

    pub(crate) fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }

    pub(crate) fn set_capacity(&mut self, capacity: f64, now: Instant) -> Result<(), ConfigError> {
        if !(capacity > 0.0 && capacity.is_finite()) {
            return Err(ConfigError::NonPositiveTokens(capacity));
        }
        self.refill(now);
        self.capacity = capacity;
        self.tokens = self.tokens.min(capacity);
        Ok(())
    }

    pub(crate) fn stats(&mut self, now: Instant) -> BucketStats {
        self.refill(now);
        BucketStats {
            capacity: self.capacity,
            tokens_available: self.tokens,
            refill_rate: self.refill_per_sec * 60.0,
            utilization: 1.0 - self.tokens / self.capacity,
        }
    }
}

/// A continuously refilled, capped pool of permits.
///
/// Tokens are refilled lazily from the elapsed monotonic time whenever the
/// bucket is touched, so no background task is needed. All reads and writes
/// happen under one lock, so `0 <= tokens <= capacity` holds at every
/// observable point.
///
/// ```rust
/// use shot_retry::RateLimitConfig;
/// use shot_retry::TokenBucket;
///
/// let config = RateLimitConfig::builder()
///     .initial_tokens(2.0)
///     .refill_rate(0.0)
///     .build()
///     .unwrap();
/// let bucket = TokenBucket::new(&config);
///
/// assert!(bucket.consume(2.0));
/// assert!(!bucket.consume(1.0));
/// ```
#[derive(Debug)]
pub struct TokenBucket {
    reservoir: Mutex<Reservoir>,
    clock: Clock,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Clock) -> Self {
        let reservoir = Reservoir::new(config, clock.now());
        Self {
            reservoir: Mutex::new(reservoir),
            clock,
        }
    }

    /// Take `tokens` from the bucket if that many are available.
    ///
    /// Negative requests are refused.
    pub fn consume(&self, tokens: f64) -> bool {
        self.try_consume(tokens).is_continue()
    }

    /// Like [`consume`](Self::consume), but reports how long to wait on failure.
    ///
    /// The wait is capped at the configured `max_delay`. A bucket that never
    /// refills reports `max_delay`.
    pub fn try_consume(&self, tokens: f64) -> ControlFlow<Reason> {
        let now = self.clock.now();
        self.reservoir.lock().try_consume(tokens, now)
    }

    pub fn available(&self) -> f64 {
        let now = self.clock.now();
        self.reservoir.lock().available(now)
    }

    pub fn capacity(&self) -> f64 {
        self.reservoir.lock().capacity()
    }

    /// Refill to capacity.
    pub fn reset(&self) {
        let now = self.clock.now();
        self.reservoir.lock().reset(now);
    }

    /// Change capacity. Tokens above the new capacity are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NonPositiveTokens`] for a zero, negative or
    /// non-finite capacity.
    pub fn set_capacity(&self, capacity: f64) -> Result<(), ConfigError> {
        let now = self.clock.now();
        self.reservoir.lock().set_capacity(capacity, now)
    }

    pub fn stats(&self) -> BucketStats {
        let now = self.clock.now();
        self.reservoir.lock().stats(now)
    }
}
