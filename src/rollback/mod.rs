// ABOUTME: Compensating rollback: unwinds registered actions strictly LIFO.
// ABOUTME: Progress is checkpointed per step so a crash mid-unwind resumes correctly.

use crate::capability::{CapabilityContext, CapabilityError, CapabilityRegistry};
use crate::store::{DeploymentState, RollbackFailure, StateStore, StoreError};
use crate::types::TargetName;

/// Result of one rollback pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    /// Nothing was pending.
    Nothing,
    FullyRolledBack,
    PartiallyRolledBack { failed: Vec<RollbackFailure> },
}

/// Unwind every pending action registered for one target, newest first.
pub async fn rollback_target<S: StateStore>(
    store: &S,
    state: &mut DeploymentState,
    registry: &CapabilityRegistry,
    target: &TargetName,
) -> Result<RollbackOutcome, StoreError> {
    unwind(store, state, registry, Some(target)).await
}

/// Unwind the whole pending stack, newest first.
pub async fn rollback_all<S: StateStore>(
    store: &S,
    state: &mut DeploymentState,
    registry: &CapabilityRegistry,
) -> Result<RollbackOutcome, StoreError> {
    unwind(store, state, registry, None).await
}

/// Pop and compensate pending entries in strict reverse-registration order.
///
/// Individual compensation failures are recorded and skipped over, so one
/// broken compensator never blocks unwinding the rest. State is saved after
/// every step: a crash mid-unwind resumes at the exact stack position,
/// neither re-running finished compensations nor skipping pending ones.
async fn unwind<S: StateStore>(
    store: &S,
    state: &mut DeploymentState,
    registry: &CapabilityRegistry,
    target: Option<&TargetName>,
) -> Result<RollbackOutcome, StoreError> {
    let mut failed = Vec::new();
    let mut any = false;

    while let Some(index) = state.rollback.next_pending(target) {
        any = true;
        let entry = state.rollback.stack[index].clone();
        let ctx = CapabilityContext {
            deployment_id: state.deployment_id.clone(),
            phase: entry.phase.clone(),
            scope: state.scope,
        };

        tracing::info!(
            action = %entry.action_id,
            capability = %entry.capability,
            target = %entry.target,
            "compensating"
        );

        let result = match registry.get(&entry.capability) {
            Some(capability) => capability.compensate(&entry.target, &ctx).await,
            None => Err(CapabilityError::Fatal(format!(
                "capability '{}' not registered",
                entry.capability
            ))),
        };

        let slot = &mut state.rollback.stack[index];
        slot.compensated = true;
        if let Err(error) = result {
            tracing::error!(
                action = %entry.action_id,
                capability = %entry.capability,
                target = %entry.target,
                error = %error,
                "compensation failed; continuing rollback"
            );
            slot.compensation_error = Some(error.to_string());
            if let Some(failure) = RollbackFailure::from_entry(slot) {
                failed.push(failure);
            }
        }

        store.save(state).await?;
    }

    if !any {
        return Ok(RollbackOutcome::Nothing);
    }
    if failed.is_empty() {
        Ok(RollbackOutcome::FullyRolledBack)
    } else {
        Ok(RollbackOutcome::PartiallyRolledBack { failed })
    }
}
