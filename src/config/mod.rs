// ABOUTME: Orchestrator configuration types and YAML parsing.
// ABOUTME: Covers retry, backoff, circuit breaker, locking, and parallelism.

mod breaker;
mod lock;
mod retry;

pub use breaker::BreakerConfig;
pub use lock::LockConfig;
pub use retry::{BackoffConfig, RetryConfig};

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Tunables for one orchestrator instance.
///
/// Every knob has a default, so `{}` is a valid configuration document.
/// Config file discovery and layered merging belong to the calling tool, not
/// to this crate; callers hand in a finished document.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub lock: LockConfig,

    /// Upper bound on concurrently processed targets in portfolio and
    /// enterprise scopes. Single scope is always sequential.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_parallelism() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::template()
    }
}

impl OrchestratorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn template() -> Self {
        Self {
            retry: RetryConfig::default(),
            backoff: BackoffConfig::default(),
            breaker: BreakerConfig::default(),
            lock: LockConfig::default(),
            parallelism: default_parallelism(),
        }
    }
}
