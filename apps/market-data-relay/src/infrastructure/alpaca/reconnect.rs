//! Reconnection Policy
//!
//! Exponential backoff with jitter for upstream reconnection.
//!
//! For attempt `n` (1-based) the unjittered delay is
//! `clamp(min_delay * 2^min(n - 1, max_exponent), min_delay, max_delay)`.
//! Jitter of `±jitter_factor` is applied on top and the result is clamped
//! back into `[min_delay, max_delay]`. Attempts are never capped: the relay
//! retries until shutdown.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub min_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Jitter factor as a fraction (e.g., 0.2 = ±20% randomization).
    pub jitter_factor: f64,
    /// Largest exponent applied to `min_delay`.
    pub max_exponent: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            max_exponent: 4,
        }
    }
}

impl ReconnectConfig {
    /// Create a configuration with the default jitter and exponent cap.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            ..Self::default()
        }
    }

    /// Create configuration from `ReconnectSettings`.
    #[must_use]
    pub fn from_settings(settings: &crate::ReconnectSettings) -> Self {
        Self::new(settings.min_delay, settings.max_delay)
    }
}

/// Reconnection policy implementing exponential backoff with jitter.
///
/// # Example
///
/// ```rust
/// use market_data_relay::infrastructure::alpaca::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// let attempt = policy.begin_attempt();
/// assert_eq!(attempt, 1);
///
/// let delay = policy.next_delay();
/// assert!(delay >= Duration::from_secs(1));
///
/// // Simulate successful subscription
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Record a new connection attempt and return its 1-based number.
    pub const fn begin_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }

    /// Reset the policy after a successful subscription.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Delay before retrying after the current attempt failed.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let base = self.base_delay(self.attempt_count.max(1));
        self.clamp(self.apply_jitter(base))
    }

    /// Unjittered delay for attempt `attempt` (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(self.config.max_exponent);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let scaled = self.config.min_delay.saturating_mul(factor);
        self.clamp(scaled)
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.clamp(self.config.min_delay, self.config.max_delay)
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
