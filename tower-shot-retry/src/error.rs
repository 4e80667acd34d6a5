use std::time::Duration;

use shot_retry::RetryError;
use tower::BoxError;

/// Failures produced by the retry middleware itself.
///
/// Errors from the inner service that are not retried are passed through
/// unchanged and never wrapped in a `ShotError`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShotError {
    /// The token budget could not cover the request within `max_delay`.
    #[error("token budget exceeded: requested {requested} tokens, {available:.2} available")]
    TokenBudgetExceeded { requested: f64, available: f64 },

    /// Every permitted retry failed.
    ///
    /// The string contains the `Display` representation of the last inner error.
    #[error("retries exhausted after {attempts} attempts over {total_delay:?}: {last_error}")]
    Exhausted {
        attempts: u32,
        total_delay: Duration,
        last_error: String,
    },

    #[error("request cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

pub(crate) fn into_box_error(err: RetryError<BoxError>) -> BoxError {
    match err {
        RetryError::Operation(inner) => inner,
        RetryError::TokenBudgetExceeded {
            requested,
            available,
        } => ShotError::TokenBudgetExceeded {
            requested,
            available,
        }
        .into(),
        RetryError::RateLimitExhausted {
            attempts,
            total_delay,
            last_error,
        } => ShotError::Exhausted {
            attempts,
            total_delay,
            last_error: last_error.to_string(),
        }
        .into(),
        RetryError::Cancelled { attempts } => ShotError::Cancelled { attempts }.into(),
    }
}
