// ABOUTME: Capability contract: named idempotent units of deployment work.
// ABOUTME: Concrete capabilities live with their vendor clients, outside this crate.

mod registry;

pub use registry::{CapabilityBinding, CapabilityRegistry, PhaseTable};

use crate::types::{DeploymentId, PhaseName, Scope, TargetName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification for capability calls.
///
/// Retryable failures are handled internally with backoff; fatal failures
/// fail the call immediately.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("retryable failure: {0}")]
    Retryable(String),

    #[error("fatal failure: {0}")]
    Fatal(String),
}

/// Call context handed to every capability invocation.
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    pub deployment_id: DeploymentId,
    pub phase: PhaseName,
    pub scope: Scope,
}

/// A named, idempotent unit of deployment work.
///
/// `execute` must be safe to re-run after a crash: implementations re-check
/// target state before acting, so a resumed phase never double-applies a
/// side effect. `compensate` undoes a previously successful `execute` during
/// rollback; the default is a no-op for capabilities without lasting effects.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        target: &TargetName,
        ctx: &CapabilityContext,
    ) -> Result<(), CapabilityError>;

    async fn compensate(
        &self,
        _target: &TargetName,
        _ctx: &CapabilityContext,
    ) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// Whether a capability failure fails its target immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Exhausted retries fail the phase for the target and trigger
    /// target-scoped rollback.
    Critical,
    /// Exhausted retries mark the target failed for the phase; no rollback.
    NonCritical,
}

/// Terminal outcome of one capability call after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityOutcome {
    Success,
    Retried,
    Failed,
}

/// Result of one capability call against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub capability: String,
    pub target: TargetName,
    pub outcome: CapabilityOutcome,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CapabilityResult {
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, CapabilityOutcome::Failed)
    }
}
