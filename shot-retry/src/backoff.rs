use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::RateLimitConfig;
use crate::RetryState;

/// Smallest delay jitter may produce.
pub const MIN_JITTERED_DELAY: Duration = Duration::from_millis(100);

/// Point-in-time view of a backoff calculator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackoffStats {
    pub strategy: &'static str,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retries_remaining: u32,
    pub last_delay: Duration,
    /// Unjittered delay for the next retry.
    pub next_delay: Duration,
    /// Unjittered sum of every remaining retry delay.
    pub estimated_remaining_wait: Duration,
}

/// Computes how long to wait before the next retry.
///
/// Implementations are pure functions of the configuration and the
/// [`RetryState`] they are handed, apart from jitter randomness.
pub trait Backoff: Debug + Send + Sync {
    /// Delay before the retry numbered `state.retry_count`. Zero when no
    /// retry is pending.
    fn calculate_delay(&self, state: &RetryState) -> Duration;

    /// Whether another retry is permitted.
    fn should_retry(&self, state: &RetryState) -> bool;

    /// Sum of unjittered delays for the next `remaining_attempts` retries.
    ///
    /// Only for progress estimates; never used for decisions.
    fn estimate_total_wait(&self, remaining_attempts: u32) -> Duration;

    /// Record a success.
    fn reset(&self, state: &mut RetryState) {
        state.retry_count = 0;
        state.last_delay = Duration::ZERO;
        state.consecutive_successes = state.consecutive_successes.saturating_add(1);
        state.consecutive_failures = 0;
    }

    fn stats(&self, state: &RetryState) -> BackoffStats;
}

/// `initial_delay * multiplier^(n - 1)`, capped at `max_delay`, with
/// symmetric jitter.
///
/// Jitter spreads the delay uniformly over `delay * (1 ± jitter_factor)` and
/// then floors it at [`MIN_JITTERED_DELAY`]. The floor never lifts a delay
/// above `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: Arc<RateLimitConfig>,
}

impl ExponentialBackoff {
    pub fn new(config: Arc<RateLimitConfig>) -> Self {
        Self { config }
    }

    /// The unjittered delay for the given retry.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry_count - 1).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay().as_secs_f64()
            * self.config.backoff_multiplier().powi(exponent);
        self.cap(secs)
    }

    /// Spread `delay` by the configured jitter factor.
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor();
        if factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let base = delay.as_secs_f64();
        let spread = base * factor;
        let jittered = base + rand::rng().random_range(-spread..=spread);
        self.cap(jittered.max(MIN_JITTERED_DELAY.as_secs_f64()))
    }

    /// Convert seconds to a delay no larger than `max_delay`. Infinities and
    /// overflow saturate at `max_delay`.
    fn cap(&self, secs: f64) -> Duration {
        let max = self.config.max_delay();
        if !(secs < max.as_secs_f64()) {
            return max;
        }
        Duration::try_from_secs_f64(secs).map_or(max, |delay| delay.min(max))
    }

    fn stats_named(&self, strategy: &'static str, state: &RetryState) -> BackoffStats {
        let max_retries = self.config.max_retries();
        let retries_remaining = max_retries.saturating_sub(state.retry_count);
        BackoffStats {
            strategy,
            retry_count: state.retry_count,
            max_retries,
            retries_remaining,
            last_delay: state.last_delay,
            next_delay: self.base_delay(state.retry_count.saturating_add(1)),
            estimated_remaining_wait: self.estimate_total_wait(retries_remaining),
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn calculate_delay(&self, state: &RetryState) -> Duration {
        self.apply_jitter(self.base_delay(state.retry_count))
    }

    fn should_retry(&self, state: &RetryState) -> bool {
        state.retry_count < self.config.max_retries()
    }

    fn estimate_total_wait(&self, remaining_attempts: u32) -> Duration {
        (1..=remaining_attempts)
            .map(|retry| self.base_delay(retry))
            .sum()
    }

    fn stats(&self, state: &RetryState) -> BackoffStats {
        self.stats_named("exponential", state)
    }
}

/// Exponential backoff that reacts to recent history.
///
/// A healthy success streak shrinks delays by `adaptation_factor`; a failure
/// streak grows them by its inverse. Failure wins when both streaks are over
/// threshold. The result is still capped at `max_delay`, and the retry
/// ceiling is untouched.
#[derive(Debug, Clone)]
pub struct AdaptiveBackoff {
    exponential: ExponentialBackoff,
    config: Arc<RateLimitConfig>,
}

impl AdaptiveBackoff {
    pub fn new(config: Arc<RateLimitConfig>) -> Self {
        Self {
            exponential: ExponentialBackoff::new(Arc::clone(&config)),
            config,
        }
    }

    /// Multiplier applied to the exponential delay for this state.
    pub fn scale(&self, state: &RetryState) -> f64 {
        let adaptive = self.config.adaptive();
        if state.consecutive_failures >= adaptive.failure_threshold {
            1.0 / adaptive.adaptation_factor
        } else if state.consecutive_successes >= adaptive.success_threshold {
            adaptive.adaptation_factor
        } else {
            1.0
        }
    }
}

impl Backoff for AdaptiveBackoff {
    fn calculate_delay(&self, state: &RetryState) -> Duration {
        let base = self.exponential.base_delay(state.retry_count);
        if base.is_zero() {
            return base;
        }
        let scaled = self.exponential.cap(base.as_secs_f64() * self.scale(state));
        self.exponential.apply_jitter(scaled)
    }

    fn should_retry(&self, state: &RetryState) -> bool {
        self.exponential.should_retry(state)
    }

    fn estimate_total_wait(&self, remaining_attempts: u32) -> Duration {
        self.exponential.estimate_total_wait(remaining_attempts)
    }

    fn stats(&self, state: &RetryState) -> BackoffStats {
        self.exponential.stats_named("adaptive", state)
    }
}

#[cfg(test)]
mod tests {
    use more_asserts::assert_ge;
    use more_asserts::assert_gt;
    use more_asserts::assert_le;
    use more_asserts::assert_lt;

    use super::*;

    fn config(initial: Duration, max: Duration, jitter: f64) -> Arc<RateLimitConfig> {
        Arc::new(
            RateLimitConfig::builder()
                .initial_delay(initial)
                .max_delay(max)
                .jitter_factor(jitter)
                .backoff_multiplier(2.0)
                .build()
                .unwrap(),
        )
    }

    fn state(retry_count: u32) -> RetryState {
        RetryState {
            retry_count,
            ..Default::default()
        }
    }

    #[test]
    fn no_retry_means_no_delay() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_secs(1),
            Duration::from_secs(60),
            0.1,
        ));
        assert_eq!(backoff.calculate_delay(&state(0)), Duration::ZERO);
    }

    #[test]
    fn delays_double() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_secs(1),
            Duration::from_secs(60),
            0.0,
        ));
        assert_eq!(backoff.calculate_delay(&state(1)), Duration::from_secs(1));
        assert_eq!(backoff.calculate_delay(&state(2)), Duration::from_secs(2));
        assert_eq!(backoff.calculate_delay(&state(3)), Duration::from_secs(4));
    }

    #[test]
    fn delays_are_capped() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_secs(1),
            Duration::from_secs(5),
            0.0,
        ));
        assert_eq!(backoff.calculate_delay(&state(10)), Duration::from_secs(5));
        assert_eq!(
            backoff.calculate_delay(&state(u32::MAX)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn jittered_delays_never_exceed_max() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_millis(50),
            Duration::from_secs(3),
            0.5,
        ));
        for retry in 0..40 {
            for _ in 0..20 {
                assert_le!(backoff.calculate_delay(&state(retry)), Duration::from_secs(3));
            }
        }
    }

    #[test]
    fn jitter_stays_around_midpoint() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_secs(10),
            Duration::from_secs(60),
            0.1,
        ));
        let delays: Vec<_> = (0..50).map(|_| backoff.calculate_delay(&state(1))).collect();

        for delay in &delays {
            assert_ge!(*delay, Duration::from_secs(9));
            assert_le!(*delay, Duration::from_secs(11));
        }
        assert!(
            delays.iter().any(|d| *d != delays[0]),
            "jitter should vary the delay"
        );
    }

    #[test]
    fn jitter_is_floored() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_millis(10),
            Duration::from_secs(1),
            0.9,
        ));
        for _ in 0..50 {
            assert_ge!(backoff.calculate_delay(&state(1)), MIN_JITTERED_DELAY);
        }
    }

    #[test]
    fn floor_never_exceeds_max_delay() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_millis(20),
            Duration::from_millis(50),
            0.5,
        ));
        for _ in 0..50 {
            assert_eq!(
                backoff.calculate_delay(&state(1)),
                Duration::from_millis(50)
            );
        }
    }

    #[test]
    fn retry_ceiling() {
        let config = Arc::new(RateLimitConfig::builder().max_retries(2).build().unwrap());
        let backoff = ExponentialBackoff::new(config);
        assert!(backoff.should_retry(&state(0)));
        assert!(backoff.should_retry(&state(1)));
        assert!(!backoff.should_retry(&state(2)));
    }

    #[test]
    fn estimate_sums_unjittered_delays() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_secs(1),
            Duration::from_secs(5),
            0.5,
        ));
        // 1 + 2 + 4 + 5
        assert_eq!(backoff.estimate_total_wait(4), Duration::from_secs(12));
        assert_eq!(backoff.estimate_total_wait(0), Duration::ZERO);
    }

    #[test]
    fn reset_records_success() {
        let backoff = ExponentialBackoff::new(config(
            Duration::from_secs(1),
            Duration::from_secs(60),
            0.0,
        ));
        let mut state = RetryState {
            retry_count: 3,
            last_delay: Duration::from_secs(4),
            consecutive_failures: 3,
            ..Default::default()
        };

        backoff.reset(&mut state);

        assert_eq!(state.retry_count, 0);
        assert_eq!(state.last_delay, Duration::ZERO);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.consecutive_successes, 1);
    }

    #[test]
    fn adaptive_shrinks_after_success_streak() {
        let backoff = AdaptiveBackoff::new(config(
            Duration::from_secs(10),
            Duration::from_secs(60),
            0.0,
        ));
        let state = RetryState {
            retry_count: 1,
            consecutive_successes: 3,
            ..Default::default()
        };
        assert_lt!(backoff.calculate_delay(&state), Duration::from_secs(10));
        assert_eq!(backoff.calculate_delay(&state), Duration::from_secs(5));
    }

    #[test]
    fn adaptive_grows_after_failure_streak() {
        let backoff = AdaptiveBackoff::new(config(
            Duration::from_secs(10),
            Duration::from_secs(60),
            0.0,
        ));
        let state = RetryState {
            retry_count: 1,
            consecutive_failures: 2,
            ..Default::default()
        };
        assert_gt!(backoff.calculate_delay(&state), Duration::from_secs(10));
        assert_eq!(backoff.calculate_delay(&state), Duration::from_secs(20));
    }

    #[test]
    fn adaptive_failure_streak_wins_and_is_capped() {
        let backoff = AdaptiveBackoff::new(config(
            Duration::from_secs(10),
            Duration::from_secs(15),
            0.0,
        ));
        let state = RetryState {
            retry_count: 1,
            consecutive_successes: 5,
            consecutive_failures: 2,
            ..Default::default()
        };
        assert_eq!(backoff.calculate_delay(&state), Duration::from_secs(15));
    }

    #[test]
    fn adaptive_keeps_zero_and_ceiling() {
        let config = Arc::new(
            RateLimitConfig::builder()
                .max_retries(1)
                .jitter_factor(0.0)
                .build()
                .unwrap(),
        );
        let backoff = AdaptiveBackoff::new(config);
        let state = RetryState {
            consecutive_failures: 10,
            ..Default::default()
        };
        assert_eq!(backoff.calculate_delay(&state), Duration::ZERO);
        assert!(backoff.should_retry(&state));
        assert!(!backoff.should_retry(&RetryState {
            retry_count: 1,
            ..state
        }));
    }

    #[test]
    fn stats_describe_next_retry() {
        let backoff = AdaptiveBackoff::new(config(
            Duration::from_secs(1),
            Duration::from_secs(60),
            0.0,
        ));
        let stats = backoff.stats(&state(2));
        assert_eq!(stats.strategy, "adaptive");
        assert_eq!(stats.retry_count, 2);
        assert_eq!(stats.max_retries, 5);
        assert_eq!(stats.retries_remaining, 3);
        assert_eq!(stats.next_delay, Duration::from_secs(4));
        // 1 + 2 + 4
        assert_eq!(stats.estimated_remaining_wait, Duration::from_secs(7));
    }
}
