// ABOUTME: Retry and backoff configuration for capability execution.
// ABOUTME: Defines attempt bounds and exponential backoff parameters.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per capability call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Hard timeout for a single capability attempt.
    #[serde(default = "default_attempt_timeout", with = "humantime_serde")]
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    #[serde(default = "default_initial", with = "humantime_serde")]
    pub initial: Duration,

    /// Multiplier applied to the delay after each retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on any single delay.
    #[serde(default = "default_max", with = "humantime_serde")]
    pub max: Duration,

    /// Apply deterministic jitter derived from the attempt number.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: default_initial(),
            multiplier: default_multiplier(),
            max: default_max(),
            jitter: default_jitter(),
        }
    }
}

fn default_initial() -> Duration {
    Duration::from_millis(200)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> bool {
    true
}
