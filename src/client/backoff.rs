//! Reconnect schedule for the live session

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor applied after every scheduled attempt
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Reconnects allowed before the caller should give up
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 1.5,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Multiplier below 1.0 or not finite falls back to 1.0; jitter is
    /// clamped to 0.0..=1.0
    fn normalized(mut self) -> Self {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            tracing::warn!(multiplier = self.multiplier, "Invalid backoff multiplier, using 1.0");
            self.multiplier = 1.0;
        }
        self.jitter_factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

/// Bounded exponential backoff.
///
/// The first delay is `initial_delay_ms` itself; each later one is the
/// previous times `multiplier`, so the default schedule is
/// 1000, 1500, 2250, 3375, 5062.5 ms.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    current_delay_ms: f64,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let config = config.normalized();
        let initial = config.initial_delay_ms as f64;
        Self {
            config,
            current_delay_ms: initial,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;

        let base = self.current_delay_ms;
        self.current_delay_ms = (base * self.config.multiplier).min(self.config.max_delay_ms as f64);

        // Apply jitter only if jitter_factor > 0
        let jitter_range = base * self.config.jitter_factor;
        let delay_ms = if jitter_range > 0.0 {
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (base + jitter).max(1.0)
        } else {
            base.max(1.0)
        };

        Some(Duration::from_secs_f64(delay_ms / 1000.0))
    }

    /// Back to the initial delay with a full budget
    pub fn reset(&mut self) {
        self.current_delay_ms = self.config.initial_delay_ms as f64;
        self.attempts = 0;
    }

    /// Attempts scheduled since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay the next call to `next_delay` would return, before jitter
    pub fn current_delay(&self) -> Duration {
        Duration::from_secs_f64(self.current_delay_ms / 1000.0)
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut backoff = ReconnectBackoff::default();

        let delays: Vec<f64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();

        assert_eq!(delays, vec![1000.0, 1500.0, 2250.0, 3375.0, 5062.5]);
        assert!(backoff.exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let mut backoff = ReconnectBackoff::new(BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            multiplier: 10.0,
            jitter_factor: 0.0,
            max_attempts: 10,
        });

        backoff.next_delay();
        for _ in 0..5 {
            let delay = backoff.next_delay().unwrap();
            assert_eq!(delay, Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = ReconnectBackoff::default();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_invalid_multiplier_keeps_delay_constant() {
        for multiplier in [-2.0, 0.5, f64::NAN, f64::INFINITY] {
            let mut backoff = ReconnectBackoff::new(BackoffConfig {
                multiplier,
                ..Default::default()
            });

            for _ in 0..3 {
                assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
                assert_eq!(backoff.current_delay(), Duration::from_millis(1000));
            }
        }
    }

    #[test]
    fn test_jitter_on_zero_delay_does_not_panic() {
        let mut backoff = ReconnectBackoff::new(BackoffConfig {
            initial_delay_ms: 0,
            jitter_factor: 0.5,
            ..Default::default()
        });

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff = ReconnectBackoff::new(BackoffConfig {
            jitter_factor: 0.1,
            ..Default::default()
        });

        let delay = backoff.next_delay().unwrap().as_millis();
        assert!((900..=1100).contains(&delay));
    }
}
