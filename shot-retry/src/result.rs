use std::time::Duration;

use serde::Serialize;

use crate::RetryError;

/// How a rate limited call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetryStatus {
    Success,
    /// Out of retries, or out of tokens.
    Exhausted,
    /// The operation failed with a non-retryable error.
    Error,
    Cancelled,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Exhausted => "exhausted",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The outcome of a call together with what it cost.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    outcome: Result<T, RetryError<E>>,
    /// Times the operation was invoked.
    pub attempts: u32,
    /// Backoff time spent before attempts. Token waits are not included.
    pub total_delay: Duration,
    pub tokens_consumed: f64,
}

impl<T, E> RetryResult<T, E> {
    pub(crate) fn new(
        outcome: Result<T, RetryError<E>>,
        attempts: u32,
        total_delay: Duration,
        tokens_consumed: f64,
    ) -> Self {
        Self {
            outcome,
            attempts,
            total_delay,
            tokens_consumed,
        }
    }

    pub fn status(&self) -> RetryStatus {
        match &self.outcome {
            Ok(_) => RetryStatus::Success,
            Err(RetryError::RateLimitExhausted { .. } | RetryError::TokenBudgetExceeded { .. }) => {
                RetryStatus::Exhausted
            }
            Err(RetryError::Operation(_)) => RetryStatus::Error,
            Err(RetryError::Cancelled { .. }) => RetryStatus::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RetryError<E>> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.outcome
    }
}

impl<T, E> From<RetryResult<T, E>> for Result<T, RetryError<E>> {
    fn from(result: RetryResult<T, E>) -> Self {
        result.into_result()
    }
}
