//! Exponential reconnect backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Parameters for establishing a standing connection to a remote sink.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Upper bound on a single delay.
    pub max: Duration,
    /// Fraction of the delay added or removed at random (0.0 disables).
    pub jitter: f64,
    /// Lower bound on the deadline of one connect attempt.
    pub min_connect_timeout: Duration,
    /// Attempts before the destination is declared unavailable.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 1.6,
            max: Duration::from_secs(10),
            jitter: 0.2,
            min_connect_timeout: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Delay before attempt number `attempt` (1-based); zero for the first.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base = self.base_delay(attempt);
        // Also catches a NaN jitter.
        if !(self.jitter > 0.0) || base.is_zero() {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter.min(1.0);
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0)).min(self.max)
    }

    /// Deadline for attempt `attempt`: the current backoff, but never less
    /// than `min_connect_timeout`.
    pub fn connect_timeout(&self, attempt: u32) -> Duration {
        self.base_delay(attempt.max(2)).max(self.min_connect_timeout)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(64) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn grows_then_caps() {
        let cfg = no_jitter();
        assert_eq!(cfg.delay(1), Duration::ZERO);
        assert_eq!(cfg.delay(2), Duration::from_secs(1));
        assert_eq!(cfg.delay(3), Duration::from_millis(1600));
        assert_eq!(cfg.delay(40), Duration::from_secs(10));
        assert_eq!(cfg.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let cfg = BackoffConfig::default();
        for _ in 0..100 {
            let d = cfg.delay(3);
            assert!(d >= Duration::from_millis(1270) && d <= Duration::from_millis(1930), "{d:?}");
        }
    }

    #[test]
    fn degenerate_settings_do_not_panic() {
        let nan = BackoffConfig {
            jitter: f64::NAN,
            multiplier: f64::NAN,
            ..BackoffConfig::default()
        };
        assert_eq!(nan.delay(2), Duration::from_secs(1));
        assert_eq!(nan.delay(5), Duration::from_secs(1));

        let instant = BackoffConfig {
            initial: Duration::ZERO,
            ..BackoffConfig::default()
        };
        assert_eq!(instant.delay(4), Duration::ZERO);
    }

    #[test]
    fn connect_timeout_has_a_floor() {
        let cfg = no_jitter();
        assert_eq!(cfg.connect_timeout(1), Duration::from_secs(5));
        assert_eq!(cfg.connect_timeout(20), Duration::from_secs(10));
    }
}
