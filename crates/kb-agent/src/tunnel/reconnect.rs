//! Exponential backoff for reconnection

use std::time::Duration;

use kb_core::config::BackoffConfig;

/// Exponential backoff with jitter for reconnection attempts
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay the sequence starts from and returns to on reset
    initial: Duration,
    /// Current delay
    current: Duration,
    /// Base of the previous step, the lower bound for jitter
    previous: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        let multiplier = multiplier.max(1.0);
        Self {
            initial,
            current: initial,
            previous: Duration::from_secs_f64(initial.as_secs_f64() / multiplier),
            max,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Get the next delay and advance the backoff.
    ///
    /// Jitter only ever shortens the delay and never drops it below the
    /// previous step's base, so consecutive delays never decrease and never
    /// exceed `max`.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let floor = std::cmp::min(self.previous, base);

        let next = Duration::from_secs_f64(base.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);
        self.previous = base;

        let spread = base.saturating_sub(floor).as_secs_f64() * self.jitter;
        let jitter_amount = Duration::from_secs_f64(spread * rand::random::<f64>());
        std::cmp::max(base.saturating_sub(jitter_amount), floor)
    }

    /// Delay the next failure will start from, before jitter
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return to the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.previous = Duration::from_secs_f64(self.initial.as_secs_f64() / self.multiplier);
    }
}
