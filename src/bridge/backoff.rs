//! Reconnect backoff policy

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Capped exponential backoff with optional equal jitter
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl BackoffPolicy {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial,
            max: config.max,
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    ///
    /// With jitter the delay is uniform in `[nominal / 2, nominal]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let half = nominal / 2;
        half + rand::thread_rng().gen_range(Duration::ZERO..=nominal - half)
    }

    fn nominal(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}
