use std::time::Duration;

/// Invalid configuration, reported when a [`RateLimitConfig`](crate::RateLimitConfig)
/// is built. A limiter never fails on configuration at call time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("initial_tokens must be positive, got {0}")]
    NonPositiveTokens(f64),

    #[error("refill_rate must be positive or zero, got {0}")]
    NegativeRefillRate(f64),

    #[error("initial_delay must be non-zero")]
    ZeroInitialDelay,

    #[error("max_delay must be >= initial_delay ({max_delay:?} < {initial_delay:?})")]
    InvertedDelays {
        initial_delay: Duration,
        max_delay: Duration,
    },

    #[error("jitter_factor must be in range [0, 1), got {0}")]
    JitterOutOfRange(f64),

    #[error("backoff_multiplier must be greater than 1, got {0}")]
    MultiplierTooSmall(f64),

    #[error("token_poll_interval must be non-zero")]
    ZeroPollInterval,

    #[error("adaptation_factor must be in range (0, 1), got {0}")]
    AdaptationFactorOutOfRange(f64),

    #[error("{0} threshold must be at least 1")]
    ZeroThreshold(&'static str),

    #[error("sliding window must be non-zero")]
    ZeroWindow,
}

/// Why a rate limited call did not produce a value.
///
/// Engine failures (`TokenBudgetExceeded`, `RateLimitExhausted`, `Cancelled`)
/// are distinct from [`RetryError::Operation`], which carries a non-retryable
/// error from the wrapped operation unchanged.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Tokens could not be acquired within the allotted wait. The operation
    /// was not invoked for this attempt.
    #[error("token budget exceeded: requested {requested} tokens, {available:.2} available")]
    TokenBudgetExceeded { requested: f64, available: f64 },

    /// Every permitted retry failed.
    #[error(
        "rate limit exhausted after {attempts} attempts over {secs:.1} seconds",
        secs = .total_delay.as_secs_f64()
    )]
    RateLimitExhausted {
        attempts: u32,
        total_delay: Duration,
        #[source]
        last_error: E,
    },

    /// The caller's cancellation token fired.
    #[error("rate limited call cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    /// A non-retryable error from the operation.
    #[error(transparent)]
    Operation(E),
}

impl<E> RetryError<E> {
    /// The underlying operation error, if the failure came from the operation.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::RateLimitExhausted { last_error, .. } => Some(last_error),
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }

    /// Consume the error, keeping only the underlying operation error.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::RateLimitExhausted { last_error, .. } => Some(last_error),
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RateLimitExhausted { .. })
    }

    pub fn is_token_budget_exceeded(&self) -> bool {
        matches!(self, Self::TokenBudgetExceeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
