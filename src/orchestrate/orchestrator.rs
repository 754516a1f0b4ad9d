// ABOUTME: The phase state machine: lock, execute, checkpoint, advance.
// ABOUTME: Critical failures trigger target-scoped rollback before any terminal status.

use crate::capability::{CapabilityRegistry, Criticality, PhaseTable};
use crate::config::OrchestratorConfig;
use crate::error::Error;
use crate::exec::{PhaseExecutor, PhaseResult, TargetOutcome};
use crate::rollback;
use crate::store::{DeploymentState, DeploymentStatus, StateStore, TargetStatus};
use crate::types::{DeploymentId, TargetName};
use chrono::Utc;
use std::sync::Arc;

use super::{CancelFlag, StatusReport};

/// Drives one deployment through its phase topology.
///
/// Each phase runs under the deployment's advisory lock and ends with a
/// durable checkpoint; the next phase starts only once that checkpoint is
/// saved. The same machine serves every scope: scopes differ only in the
/// capability tables they bind and how targets are iterated.
pub struct Orchestrator<S> {
    store: Arc<S>,
    registry: Arc<CapabilityRegistry>,
    config: OrchestratorConfig,
    executor: PhaseExecutor,
    cancel: CancelFlag,
}

impl<S: StateStore> Orchestrator<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<CapabilityRegistry>,
        config: OrchestratorConfig,
        cancel: CancelFlag,
    ) -> Self {
        let executor = PhaseExecutor::new(Arc::clone(&registry), &config);
        Self {
            store,
            registry,
            config,
            executor,
            cancel,
        }
    }

    /// Run the deployment to a terminal status, resuming from the last
    /// checkpoint if one exists.
    ///
    /// Calling this on an already-terminal deployment performs no capability
    /// calls and returns the stored result.
    pub async fn execute(&self, id: &DeploymentId) -> Result<StatusReport, Error> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled(id.clone()));
            }

            let guard = self
                .store
                .lock(id, self.config.lock.wait_timeout)
                .await?;
            let mut state = self.store.load(id).await?;

            if state.is_terminal() {
                return Ok(StatusReport::from_state(&state));
            }

            self.finish_pending_rollbacks(&mut state).await?;

            if state.all_targets_settled() {
                self.finish(&mut state).await?;
                return Ok(StatusReport::from_state(&state));
            }

            let phase = state.phase.clone();
            let table = PhaseTable::for_scope(state.scope);
            tracing::info!(
                deployment = %id,
                phase = %phase,
                scope = %state.scope,
                "starting phase"
            );

            // Durably mark that this epoch is being driven, so a crash from
            // here on is detectable as a fresh interruption.
            state.drive_epoch += 1;
            self.store.save(&state).await?;

            let result = self.executor.run_phase(&state, &table, &self.cancel).await?;
            let cancelled = self.apply_phase_result(&mut state, result).await?;
            if cancelled {
                // Persist partial per-target progress; a later start resumes
                // the phase and skips targets that already completed it.
                self.store.save(&state).await?;
                return Err(Error::Cancelled(id.clone()));
            }

            // Durable checkpoint: the phase reached a terminal per-target
            // outcome for every participating target.
            state.checkpoint = Some(phase.clone());
            if let Some(next) = state.next_phase() {
                state.phase = next;
            }
            self.store.save(&state).await?;
            guard.release();
        }
    }

    /// Complete any target rollback that a previous process left unfinished.
    async fn finish_pending_rollbacks(&self, state: &mut DeploymentState) -> Result<(), Error> {
        let pending: Vec<TargetName> = state
            .target_states
            .iter()
            .filter(|(_, ts)| ts.rollback_pending)
            .map(|(target, _)| target.clone())
            .collect();

        for target in pending {
            tracing::warn!(
                deployment = %state.deployment_id,
                target = %target,
                "completing interrupted rollback"
            );
            rollback::rollback_target(self.store.as_ref(), state, &self.registry, &target).await?;
            let ts = state.target_state_mut(&target);
            ts.rollback_pending = false;
            ts.status = TargetStatus::RolledBack;
            self.store.save(state).await?;
        }

        Ok(())
    }

    /// Merge phase outcomes into state and run target-scoped rollback for
    /// critical failures. Returns true if execution was cancelled mid-phase.
    async fn apply_phase_result(
        &self,
        state: &mut DeploymentState,
        result: PhaseResult,
    ) -> Result<bool, Error> {
        let phase = result.phase;
        let mut cancelled = false;
        let mut critical: Vec<TargetName> = Vec::new();

        for (target, outcome) in result.outcomes {
            let TargetOutcome {
                results,
                registered,
                failure,
                cancelled: target_cancelled,
            } = outcome;

            for entry in registered {
                state.rollback.register(entry);
            }

            let ts = state.target_state_mut(&target);
            ts.capability_results.extend(results);

            if target_cancelled {
                cancelled = true;
                continue;
            }

            match failure {
                None => {
                    ts.status = TargetStatus::Running;
                    if !ts.completed_phases.contains(&phase) {
                        ts.completed_phases.push(phase.clone());
                    }
                    ts.last_error = None;
                }
                Some(failure) => {
                    ts.status = TargetStatus::Failed;
                    ts.last_error = Some(format!(
                        "phase '{}' capability '{}' failed: {}",
                        phase, failure.capability, failure.error
                    ));
                    if failure.criticality == Criticality::Critical {
                        ts.rollback_pending = true;
                        critical.push(target.clone());
                    }
                    tracing::error!(
                        deployment = %state.deployment_id,
                        target = %target,
                        phase = %phase,
                        capability = %failure.capability,
                        error = %failure.error,
                        "target failed phase"
                    );
                }
            }
        }

        if cancelled {
            return Ok(true);
        }

        for target in critical {
            // Persist the failure and pending flag first, so a crash during
            // the unwind resumes it instead of losing it.
            self.store.save(state).await?;
            tracing::warn!(
                deployment = %state.deployment_id,
                target = %target,
                phase = %phase,
                "critical failure; rolling back target"
            );
            rollback::rollback_target(self.store.as_ref(), state, &self.registry, &target).await?;
            let ts = state.target_state_mut(&target);
            ts.rollback_pending = false;
            ts.status = TargetStatus::RolledBack;
        }

        Ok(false)
    }

    /// Compute and persist the terminal status.
    async fn finish(&self, state: &mut DeploymentState) -> Result<(), Error> {
        let targets: Vec<TargetName> = state.targets.iter().cloned().collect();
        for target in &targets {
            let ts = state.target_state_mut(target);
            if !ts.is_blocked() {
                ts.status = TargetStatus::Completed;
            }
        }

        let all_completed = targets
            .iter()
            .all(|t| state.target_state(t).status == TargetStatus::Completed);
        let all_rolled_back = targets
            .iter()
            .all(|t| state.target_state(t).status == TargetStatus::RolledBack);
        let compensation_failures = state.rollback.failures();

        state.status = if all_completed {
            DeploymentStatus::Success
        } else if !compensation_failures.is_empty() {
            DeploymentStatus::PartiallyRolledBack
        } else if all_rolled_back {
            DeploymentStatus::RolledBack
        } else {
            DeploymentStatus::Failed
        };
        state.finished_at = Some(Utc::now());
        self.store.save(state).await?;

        tracing::info!(
            deployment = %state.deployment_id,
            status = %state.status,
            "deployment finished"
        );
        Ok(())
    }
}
