// ABOUTME: Advisory lock configuration for the state store.
// ABOUTME: Bounds how long lock acquisition waits and how long a lock lives.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// How long acquisition polls for a busy lock before failing with
    /// `LockTimeout`.
    #[serde(default = "default_wait_timeout", with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// Lifetime of a held lock. Expired locks are broken by the next
    /// contender, so a crashed holder cannot wedge a deployment.
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_timeout: default_wait_timeout(),
            ttl: default_ttl(),
        }
    }
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}
