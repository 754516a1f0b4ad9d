// ABOUTME: Deployment scope: single target, portfolio, or enterprise.
// ABOUTME: Scope selects the capability tables and the target iteration model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment breadth.
///
/// Scopes differ only in how many targets a phase iterates and which
/// capability set is bound to each phase; the state machine itself is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One domain target, capabilities run sequentially.
    Single,
    /// Many targets with bounded parallelism and cross-target secret
    /// coordination.
    Portfolio,
    /// Portfolio plus compliance/audit capabilities.
    Enterprise,
}

impl Scope {
    /// Whether targets within a phase run concurrently.
    pub fn is_parallel(&self) -> bool {
        !matches!(self, Scope::Single)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Single => "single",
            Scope::Portfolio => "portfolio",
            Scope::Enterprise => "enterprise",
        };
        write!(f, "{}", name)
    }
}
