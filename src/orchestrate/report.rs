// ABOUTME: Read-only status reports derived from persisted deployment state.
// ABOUTME: The caller-facing view consumed by CLIs and UIs via polling.

use crate::store::{DeploymentState, DeploymentStatus, RollbackFailure, TargetStatus};
use crate::types::{DeploymentId, PhaseName, TargetName};
use serde::Serialize;

/// One target's view within a status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetReport {
    pub target: TargetName,
    pub status: TargetStatus,
    pub completed_phases: Vec<PhaseName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Caller-facing snapshot of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub deployment_id: DeploymentId,
    pub phase: PhaseName,
    pub status: DeploymentStatus,
    pub targets: Vec<TargetReport>,
    /// Compensations that failed during rollback; never hidden behind a
    /// success status.
    pub rollback_failures: Vec<RollbackFailure>,
}

impl StatusReport {
    pub fn from_state(state: &DeploymentState) -> Self {
        let targets = state
            .targets
            .iter()
            .map(|target| {
                let ts = state.target_state(target);
                TargetReport {
                    target: target.clone(),
                    status: ts.status,
                    completed_phases: ts.completed_phases.clone(),
                    last_error: ts.last_error.clone(),
                }
            })
            .collect();

        Self {
            deployment_id: state.deployment_id.clone(),
            phase: state.phase.clone(),
            status: state.status,
            targets,
            rollback_failures: state.rollback.failures(),
        }
    }
}
