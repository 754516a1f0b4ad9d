// ABOUTME: Persisted deployment state: phases, targets, rollback stack, recovery history.
// ABOUTME: Mutated only by the orchestrator at phase boundaries and during rollback.

use crate::capability::CapabilityResult;
use crate::types::{ActionId, DeploymentId, PhaseName, Scope, TargetName, standard_phases};
use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::version::SCHEMA_VERSION;

/// Deployment-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Success,
    Failed,
    RolledBack,
    PartiallyRolledBack,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentStatus::Running)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::PartiallyRolledBack => "partially_rolled_back",
        };
        write!(f, "{}", name)
    }
}

/// Per-target status within a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

/// Per-target progress and outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub status: TargetStatus,

    /// Phases this target has fully completed; resume skips them.
    #[serde(default)]
    pub completed_phases: Vec<PhaseName>,

    /// Capability call results accumulated across phases, for audit and
    /// status reporting.
    #[serde(default)]
    pub capability_results: Vec<CapabilityResult>,

    /// Set when a critical failure was recorded but its target-scoped
    /// rollback has not finished; resume completes the unwind first.
    #[serde(default)]
    pub rollback_pending: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            status: TargetStatus::Pending,
            completed_phases: Vec::new(),
            capability_results: Vec::new(),
            rollback_pending: false,
            last_error: None,
        }
    }
}

impl TargetState {
    pub fn has_completed(&self, phase: &PhaseName) -> bool {
        self.completed_phases.contains(phase)
    }

    /// A blocked target takes no part in subsequent phases.
    pub fn is_blocked(&self) -> bool {
        matches!(self.status, TargetStatus::Failed | TargetStatus::RolledBack)
    }
}

/// One recovery event, appended when an interrupted run is resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Monotonically increasing per deployment; generated under the store
    /// lock, so records are totally ordered and never duplicated.
    pub recovery_id: u64,
    pub from_phase: PhaseName,
    pub detected_issue: String,
    pub action_taken: String,
    pub at: DateTime<Utc>,
}

/// A compensating action registered after its capability's side effect
/// succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub action_id: ActionId,
    pub capability: String,
    pub phase: PhaseName,
    pub target: TargetName,
    pub registered_at: DateTime<Utc>,

    /// Unwind cursor: compensated entries are skipped on resume.
    #[serde(default)]
    pub compensated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_error: Option<String>,
}

impl RollbackEntry {
    pub fn new(capability: &str, phase: &PhaseName, target: &TargetName) -> Self {
        Self {
            action_id: ActionId::new(format!("{}:{}:{}", phase, target, capability)),
            capability: capability.to_string(),
            phase: phase.clone(),
            target: target.clone(),
            registered_at: Utc::now(),
            compensated: false,
            compensation_error: None,
        }
    }
}

/// A compensation that failed during rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackFailure {
    pub action_id: ActionId,
    pub capability: String,
    pub target: TargetName,
    pub error: String,
}

impl RollbackFailure {
    pub fn from_entry(entry: &RollbackEntry) -> Option<Self> {
        entry.compensation_error.as_ref().map(|error| Self {
            action_id: entry.action_id.clone(),
            capability: entry.capability.clone(),
            target: entry.target.clone(),
            error: error.clone(),
        })
    }
}

/// The per-deployment rollback stack with its persisted unwind progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackState {
    #[serde(default)]
    pub stack: Vec<RollbackEntry>,
}

impl RollbackState {
    pub fn register(&mut self, entry: RollbackEntry) {
        self.stack.push(entry);
    }

    /// Index of the next entry to compensate, newest-first, optionally
    /// limited to one target.
    pub fn next_pending(&self, target: Option<&TargetName>) -> Option<usize> {
        self.stack
            .iter()
            .rposition(|e| !e.compensated && target.is_none_or(|t| &e.target == t))
    }

    pub fn has_pending_for(&self, target: &TargetName) -> bool {
        self.next_pending(Some(target)).is_some()
    }

    /// All compensation failures recorded so far.
    pub fn failures(&self) -> Vec<RollbackFailure> {
        self.stack
            .iter()
            .filter_map(RollbackFailure::from_entry)
            .collect()
    }
}

/// Durable state for one deployment.
///
/// The embedded `phases` list is the topology this deployment was started
/// with; resume honors the persisted list even if the standard topology has
/// since changed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub schema_version: u32,
    pub deployment_id: DeploymentId,
    pub scope: Scope,
    pub phases: Vec<PhaseName>,
    pub phase: PhaseName,
    pub status: DeploymentStatus,
    pub targets: NonEmpty<TargetName>,

    #[serde(default)]
    pub target_states: BTreeMap<TargetName, TargetState>,

    #[serde(default)]
    pub rollback: RollbackState,

    #[serde(default)]
    pub recovery_history: Vec<RecoveryRecord>,

    /// Last phase with a durably saved checkpoint; the sole recovery point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PhaseName>,

    /// Bumped and saved each time a coordinator starts driving a phase.
    #[serde(default)]
    pub drive_epoch: u64,

    /// Drive epoch current when the last recovery was recorded. An
    /// interruption is only detected once per epoch, so racing recovery
    /// attempts cannot duplicate records.
    #[serde(default)]
    pub recovered_epoch: u64,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentState {
    pub fn new(deployment_id: DeploymentId, scope: Scope, targets: NonEmpty<TargetName>) -> Self {
        let phases = standard_phases();
        let phase = phases.first().expect("standard topology is nonempty").clone();
        let target_states = targets
            .iter()
            .map(|t| (t.clone(), TargetState::default()))
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            deployment_id,
            scope,
            phases,
            phase,
            status: DeploymentStatus::Running,
            targets,
            target_states,
            rollback: RollbackState::default(),
            recovery_history: Vec::new(),
            checkpoint: None,
            drive_epoch: 0,
            recovered_epoch: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Whether an interruption is detectable: a checkpoint exists, no
    /// terminal status is recorded, and the state was driven since the last
    /// recovery was recorded.
    pub fn interruption_pending(&self) -> bool {
        !self.is_terminal() && self.checkpoint.is_some() && self.drive_epoch > self.recovered_epoch
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn target_state(&self, target: &TargetName) -> TargetState {
        self.target_states.get(target).cloned().unwrap_or_default()
    }

    pub fn target_state_mut(&mut self, target: &TargetName) -> &mut TargetState {
        self.target_states.entry(target.clone()).or_default()
    }

    /// Phase after the current one in this deployment's topology.
    pub fn next_phase(&self) -> Option<PhaseName> {
        let index = self.phases.iter().position(|p| p == &self.phase)?;
        self.phases.get(index + 1).cloned()
    }

    /// Targets that still take part in the given phase: not blocked and not
    /// already past it.
    pub fn eligible_targets(&self, phase: &PhaseName) -> Vec<TargetName> {
        self.targets
            .iter()
            .filter(|t| {
                let ts = self.target_state(t);
                !ts.is_blocked() && !ts.has_completed(phase)
            })
            .cloned()
            .collect()
    }

    /// Every target is either blocked or done with every phase.
    pub fn all_targets_settled(&self) -> bool {
        self.targets.iter().all(|t| {
            let ts = self.target_state(t);
            ts.is_blocked() || self.phases.iter().all(|p| ts.has_completed(p))
        })
    }

    pub fn next_recovery_id(&self) -> u64 {
        self.recovery_history
            .last()
            .map(|r| r.recovery_id + 1)
            .unwrap_or(1)
    }
}
