//! Retry delays for broker reconnection

use std::time::Duration;

use rand::Rng;

/// Backoff configuration.
///
/// The default is a fixed 10 second wait (`multiplier == 1.0`, no jitter);
/// a multiplier above 1.0 turns it into exponential backoff capped at `max_delay_ms`.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor applied after each failed attempt
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl BackoffConfig {
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(10))
    }
}

/// Backoff calculator; unbounded, reset after a successful attempt
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current_delay_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms;
        Self {
            config,
            current_delay_ms: initial,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base_delay = if self.attempt == 1 {
            self.current_delay_ms as f64
        } else {
            self.current_delay_ms as f64 * self.config.multiplier
        };
        let capped_delay = base_delay.min(self.config.max_delay_ms.max(self.config.initial_delay_ms) as f64);
        self.current_delay_ms = capped_delay as u64;

        let jitter_range = capped_delay * self.config.jitter_factor;
        let final_delay = if jitter_range > 0.0 {
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    pub fn reset(&mut self) {
        self.current_delay_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_ten_seconds() {
        let mut backoff = Backoff::new();
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        }
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn test_exponential_backoff_increases_and_caps() {
        let config = BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter_factor: 0.0,
        };
        let mut backoff = Backoff::with_config(config);

        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            multiplier: 1.0,
            jitter_factor: 0.1,
        };
        let mut backoff = Backoff::with_config(config);
        for _ in 0..50 {
            let ms = backoff.next_delay().as_millis();
            assert!((900..=1100).contains(&ms), "delay {ms} out of range");
        }
    }

    #[test]
    fn test_reset() {
        let config = BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.0,
        };
        let mut backoff = Backoff::with_config(config);
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
