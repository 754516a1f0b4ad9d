// ABOUTME: Exponential backoff with deterministic attempt-derived jitter.
// ABOUTME: Delays never decrease across attempts, capped at a configured max.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Produces the delay before each retry.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    current: Duration,
    last_emitted: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial;
        Self {
            config,
            attempt: 0,
            current,
            last_emitted: Duration::ZERO,
        }
    }

    /// Delay before the next retry. Jitter is derived from the attempt
    /// number, so sequences are reproducible without an RNG.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let base = self.current.min(self.config.max);

        let next = self.current.as_secs_f64() * self.config.multiplier;
        self.current = Duration::from_secs_f64(next).min(self.config.max);

        let delay = if self.config.jitter {
            // +/- 25% of the base delay, offset by the attempt counter.
            let range = base.as_millis() as f64 * 0.25;
            if range >= 1.0 {
                let offset = (f64::from(self.attempt) * 7.0) % range - range / 2.0;
                let jittered = (base.as_millis() as f64 + offset).max(1.0);
                Duration::from_millis(jittered as u64)
            } else {
                base
            }
        } else {
            base
        };

        // Delays are non-decreasing even when jitter lands low.
        let delay = delay.max(self.last_emitted);
        self.last_emitted = delay;
        delay
    }
}
