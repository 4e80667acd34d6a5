use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::ConfigError;

/// Tuning for [`AdaptiveBackoff`](crate::AdaptiveBackoff).
///
/// Once `consecutive_successes` reaches `success_threshold` retry delays are
/// multiplied by `adaptation_factor`. Once `consecutive_failures` reaches
/// `failure_threshold` they are divided by it instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub success_threshold: u32,
    pub failure_threshold: u32,
    pub adaptation_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            success_threshold: 3,
            failure_threshold: 2,
            adaptation_factor: 0.5,
        }
    }
}

/// Validated rate limiting configuration.
///
/// Build one with [`RateLimitConfig::builder`]. Values are checked once, in
/// [`RateLimitConfigBuilder::build`], and cannot be changed afterwards.
///
/// ```rust
/// use shot_retry::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::builder()
///     .initial_tokens(10.0)
///     .refill_rate(60.0)
///     .max_retries(3)
///     .initial_delay(Duration::from_millis(250))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.max_retries(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RateLimitConfigBuilder", into = "RateLimitConfigBuilder")]
pub struct RateLimitConfig {
    initial_tokens: f64,
    refill_rate: f64,
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    backoff_multiplier: f64,
    token_poll_interval: Duration,
    adaptive: AdaptiveConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_tokens: 1000.0,
            refill_rate: 100.0,
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
            backoff_multiplier: 2.0,
            token_poll_interval: Duration::from_millis(100),
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Bucket capacity, which is also the number of tokens a fresh bucket holds.
    pub fn initial_tokens(&self) -> f64 {
        self.initial_tokens
    }

    /// Tokens added per minute. Zero means the bucket never refills.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn refill_per_second(&self) -> f64 {
        self.refill_rate / 60.0
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound for a single backoff delay and for a single wait on tokens.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// How long a caller sleeps between checks while waiting for tokens.
    pub fn token_poll_interval(&self) -> Duration {
        self.token_poll_interval
    }

    pub fn adaptive(&self) -> &AdaptiveConfig {
        &self.adaptive
    }
}

/// Builder for [`RateLimitConfig`]. Starts from the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfigBuilder {
    initial_tokens: f64,
    refill_rate: f64,
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    backoff_multiplier: f64,
    token_poll_interval: Duration,
    adaptive: AdaptiveConfig,
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        RateLimitConfig::default().into()
    }
}

impl From<RateLimitConfig> for RateLimitConfigBuilder {
    fn from(config: RateLimitConfig) -> Self {
        Self {
            initial_tokens: config.initial_tokens,
            refill_rate: config.refill_rate,
            max_retries: config.max_retries,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            jitter_factor: config.jitter_factor,
            backoff_multiplier: config.backoff_multiplier,
            token_poll_interval: config.token_poll_interval,
            adaptive: config.adaptive,
        }
    }
}

impl TryFrom<RateLimitConfigBuilder> for RateLimitConfig {
    type Error = ConfigError;

    fn try_from(builder: RateLimitConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl RateLimitConfigBuilder {
    pub fn initial_tokens(mut self, tokens: f64) -> Self {
        self.initial_tokens = tokens;
        self
    }

    pub fn refill_rate(mut self, tokens_per_minute: f64) -> Self {
        self.refill_rate = tokens_per_minute;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn token_poll_interval(mut self, interval: Duration) -> Self {
        self.token_poll_interval = interval;
        self
    }

    pub fn adaptive(mut self, adaptive: AdaptiveConfig) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. Nothing is clamped.
    pub fn build(self) -> Result<RateLimitConfig, ConfigError> {
        // Written as negated comparisons so NaN is rejected too.
        if !(self.initial_tokens > 0.0 && self.initial_tokens.is_finite()) {
            return Err(ConfigError::NonPositiveTokens(self.initial_tokens));
        }
        if !(self.refill_rate >= 0.0 && self.refill_rate.is_finite()) {
            return Err(ConfigError::NegativeRefillRate(self.refill_rate));
        }
        if self.initial_delay.is_zero() {
            return Err(ConfigError::ZeroInitialDelay);
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::InvertedDelays {
                initial_delay: self.initial_delay,
                max_delay: self.max_delay,
            });
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor));
        }
        if !(self.backoff_multiplier > 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(ConfigError::MultiplierTooSmall(self.backoff_multiplier));
        }
        if self.token_poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        let factor = self.adaptive.adaptation_factor;
        if !(factor > 0.0 && factor < 1.0) {
            return Err(ConfigError::AdaptationFactorOutOfRange(factor));
        }
        if self.adaptive.success_threshold == 0 {
            return Err(ConfigError::ZeroThreshold("success"));
        }
        if self.adaptive.failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold("failure"));
        }

        Ok(RateLimitConfig {
            initial_tokens: self.initial_tokens,
            refill_rate: self.refill_rate,
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            jitter_factor: self.jitter_factor,
            backoff_multiplier: self.backoff_multiplier,
            token_poll_interval: self.token_poll_interval,
            adaptive: self.adaptive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RateLimitConfig::default();
        assert_eq!(config.initial_tokens(), 1000.0);
        assert_eq!(config.refill_rate(), 100.0);
        assert_eq!(config.max_retries(), 5);
        assert_eq!(config.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.max_delay(), Duration::from_secs(60));
        assert_eq!(config.jitter_factor(), 0.1);
        assert_eq!(config.backoff_multiplier(), 2.0);
        assert_eq!(config.token_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.adaptive(), &AdaptiveConfig::default());
        assert_eq!(RateLimitConfig::builder().build().unwrap(), config);
    }

    #[test]
    fn custom_values_are_kept() {
        let config = RateLimitConfig::builder()
            .initial_tokens(500.0)
            .refill_rate(50.0)
            .max_retries(3)
            .initial_delay(Duration::from_secs(2))
            .max_delay(Duration::from_secs(30))
            .jitter_factor(0.2)
            .backoff_multiplier(1.5)
            .build()
            .unwrap();

        assert_eq!(config.initial_tokens(), 500.0);
        assert_eq!(config.refill_rate(), 50.0);
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.refill_per_second(), 50.0 / 60.0);
    }

    #[test]
    fn zero_refill_rate_is_a_static_budget() {
        let config = RateLimitConfig::builder().refill_rate(0.0).build();
        assert!(config.is_ok());
    }

    #[test]
    fn invalid_values_fail_fast() {
        let builder = RateLimitConfig::builder;

        assert_eq!(
            builder().initial_tokens(0.0).build(),
            Err(ConfigError::NonPositiveTokens(0.0))
        );
        assert_eq!(
            builder().refill_rate(-1.0).build(),
            Err(ConfigError::NegativeRefillRate(-1.0))
        );
        assert!(matches!(
            builder().refill_rate(f64::NAN).build(),
            Err(ConfigError::NegativeRefillRate(_))
        ));
        assert_eq!(
            builder()
                .initial_delay(Duration::from_secs(10))
                .max_delay(Duration::from_secs(5))
                .build(),
            Err(ConfigError::InvertedDelays {
                initial_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(5),
            })
        );
        assert_eq!(
            builder().jitter_factor(1.5).build(),
            Err(ConfigError::JitterOutOfRange(1.5))
        );
        assert_eq!(
            builder().jitter_factor(1.0).build(),
            Err(ConfigError::JitterOutOfRange(1.0))
        );
        assert_eq!(
            builder().backoff_multiplier(1.0).build(),
            Err(ConfigError::MultiplierTooSmall(1.0))
        );
        assert_eq!(
            builder().initial_delay(Duration::ZERO).build(),
            Err(ConfigError::ZeroInitialDelay)
        );
        assert_eq!(
            builder().token_poll_interval(Duration::ZERO).build(),
            Err(ConfigError::ZeroPollInterval)
        );
        assert_eq!(
            builder()
                .adaptive(AdaptiveConfig {
                    adaptation_factor: 1.0,
                    ..Default::default()
                })
                .build(),
            Err(ConfigError::AdaptationFactorOutOfRange(1.0))
        );
        assert_eq!(
            builder()
                .adaptive(AdaptiveConfig {
                    failure_threshold: 0,
                    ..Default::default()
                })
                .build(),
            Err(ConfigError::ZeroThreshold("failure"))
        );
    }

    #[test]
    fn error_messages_name_the_field() {
        let err = RateLimitConfig::builder()
            .jitter_factor(1.5)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("jitter_factor must be in range"));

        let err = RateLimitConfig::builder()
            .initial_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_delay must be >= initial_delay"));
    }

    #[test]
    fn deserialization_is_validated() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{ "initial_tokens": 5.0, "max_retries": 2 }"#).unwrap();
        assert_eq!(config.initial_tokens(), 5.0);
        assert_eq!(config.max_retries(), 2);
        assert_eq!(config.refill_rate(), 100.0);

        let err = serde_json::from_str::<RateLimitConfig>(r#"{ "jitter_factor": 2.0 }"#)
            .unwrap_err();
        assert!(err.to_string().contains("jitter_factor"));
    }

    #[test]
    fn serialization_round_trips_through_builder() {
        let config = RateLimitConfig::builder().max_retries(7).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: RateLimitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
