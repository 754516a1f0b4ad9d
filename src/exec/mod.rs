// ABOUTME: Phase execution: runs a phase's capability set per target.
// ABOUTME: Wraps capability calls with retry, backoff, timeout, and circuit breaking.

mod backoff;
mod breaker;

pub use backoff::Backoff;
pub use breaker::{Circuit, CircuitBreaker};

use crate::capability::{
    Capability, CapabilityBinding, CapabilityContext, CapabilityError, CapabilityOutcome,
    CapabilityRegistry, CapabilityResult, Criticality, PhaseTable,
};
use crate::config::{BackoffConfig, OrchestratorConfig, RetryConfig};
use crate::error::Error;
use crate::orchestrate::CancelFlag;
use crate::store::{DeploymentState, RollbackEntry};
use crate::types::{PhaseName, TargetName};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Why a target failed its phase.
#[derive(Debug, Clone)]
pub struct TargetFailure {
    pub capability: String,
    pub criticality: Criticality,
    pub error: String,
}

/// What happened to one target during a phase.
#[derive(Debug, Clone, Default)]
pub struct TargetOutcome {
    pub results: Vec<CapabilityResult>,
    /// Compensating actions registered as side effects succeeded, in
    /// registration order.
    pub registered: Vec<RollbackEntry>,
    pub failure: Option<TargetFailure>,
    /// Execution stopped cooperatively before the target finished.
    pub cancelled: bool,
}

impl TargetOutcome {
    pub fn completed(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }
}

/// Result of running one phase across its eligible targets.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: PhaseName,
    pub outcomes: BTreeMap<TargetName, TargetOutcome>,
}

/// Runs one phase's capability set per target.
///
/// Single scope runs targets sequentially; portfolio and enterprise scopes
/// run targets concurrently under a bounded limit with per-target isolation:
/// one target's failure never aborts in-flight siblings.
pub struct PhaseExecutor {
    registry: Arc<CapabilityRegistry>,
    retry: RetryConfig,
    backoff: BackoffConfig,
    breaker: CircuitBreaker,
    parallelism: usize,
}

impl PhaseExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, config: &OrchestratorConfig) -> Self {
        Self {
            registry,
            retry: config.retry.clone(),
            backoff: config.backoff.clone(),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            parallelism: config.parallelism.max(1),
        }
    }

    /// Run the state's current phase for every eligible target.
    ///
    /// # Errors
    ///
    /// Fails fast with `UnknownCapability` if the phase table references a
    /// name the registry cannot resolve; no capability runs in that case.
    pub async fn run_phase(
        &self,
        state: &DeploymentState,
        table: &PhaseTable,
        cancel: &CancelFlag,
    ) -> Result<PhaseResult, Error> {
        let phase = state.phase.clone();

        let resolved: Vec<(CapabilityBinding, Arc<dyn Capability>)> = table
            .bindings(&phase)
            .iter()
            .map(|binding| {
                self.registry
                    .get(&binding.name)
                    .map(|capability| (binding.clone(), capability))
                    .ok_or_else(|| Error::UnknownCapability {
                        name: binding.name.clone(),
                        phase: phase.clone(),
                    })
            })
            .collect::<Result<_, _>>()?;

        let ctx = CapabilityContext {
            deployment_id: state.deployment_id.clone(),
            phase: phase.clone(),
            scope: state.scope,
        };

        let eligible = state.eligible_targets(&phase);
        let mut outcomes = BTreeMap::new();

        if state.scope.is_parallel() {
            let runs = eligible.into_iter().map(|target| {
                let ctx = &ctx;
                let resolved = &resolved;
                async move {
                    let outcome = self.run_target(&target, resolved, ctx, cancel).await;
                    (target, outcome)
                }
            });
            let collected: Vec<(TargetName, TargetOutcome)> = futures::stream::iter(runs)
                .buffer_unordered(self.parallelism)
                .collect()
                .await;
            outcomes.extend(collected);
        } else {
            for target in eligible {
                let outcome = self.run_target(&target, &resolved, &ctx, cancel).await;
                outcomes.insert(target, outcome);
            }
        }

        Ok(PhaseResult { phase, outcomes })
    }

    async fn run_target(
        &self,
        target: &TargetName,
        resolved: &[(CapabilityBinding, Arc<dyn Capability>)],
        ctx: &CapabilityContext,
        cancel: &CancelFlag,
    ) -> TargetOutcome {
        let mut outcome = TargetOutcome::default();

        for (binding, capability) in resolved {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let result = self
                .run_capability(capability.as_ref(), target, ctx)
                .await;
            let failed = !result.succeeded();
            let error = result.last_error.clone();
            outcome.results.push(result);

            if failed {
                outcome.failure = Some(TargetFailure {
                    capability: binding.name.clone(),
                    criticality: binding.criticality,
                    error: error.unwrap_or_else(|| "unknown failure".to_string()),
                });
                break;
            }

            outcome
                .registered
                .push(RollbackEntry::new(&binding.name, &ctx.phase, target));
        }

        outcome
    }

    /// One capability call with bounded retries, backoff, per-attempt
    /// timeout, and circuit breaking.
    async fn run_capability(
        &self,
        capability: &dyn Capability,
        target: &TargetName,
        ctx: &CapabilityContext,
    ) -> CapabilityResult {
        let name = capability.name();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = Backoff::new(self.backoff.clone());
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if self.breaker.check(name, target) == Circuit::Open {
                return CapabilityResult {
                    capability: name.to_string(),
                    target: target.clone(),
                    outcome: CapabilityOutcome::Failed,
                    attempts: attempt - 1,
                    last_error: Some(format!("circuit open for {} on {}", name, target)),
                };
            }

            let call = capability.execute(target, ctx);
            match tokio::time::timeout(self.retry.attempt_timeout, call).await {
                Ok(Ok(())) => {
                    self.breaker.record_success(name, target);
                    return CapabilityResult {
                        capability: name.to_string(),
                        target: target.clone(),
                        outcome: if attempt > 1 {
                            CapabilityOutcome::Retried
                        } else {
                            CapabilityOutcome::Success
                        },
                        attempts: attempt,
                        last_error: None,
                    };
                }
                Ok(Err(CapabilityError::Fatal(message))) => {
                    self.breaker.record_failure(name, target);
                    return CapabilityResult {
                        capability: name.to_string(),
                        target: target.clone(),
                        outcome: CapabilityOutcome::Failed,
                        attempts: attempt,
                        last_error: Some(message),
                    };
                }
                Ok(Err(CapabilityError::Retryable(message))) => {
                    self.breaker.record_failure(name, target);
                    tracing::warn!(
                        capability = name,
                        target = %target,
                        attempt,
                        error = %message,
                        "capability attempt failed"
                    );
                    last_error = Some(message);
                }
                Err(_) => {
                    self.breaker.record_failure(name, target);
                    let message = format!(
                        "attempt timed out after {:?}",
                        self.retry.attempt_timeout
                    );
                    tracing::warn!(capability = name, target = %target, attempt, "capability attempt timed out");
                    last_error = Some(message);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }

        CapabilityResult {
            capability: name.to_string(),
            target: target.clone(),
            outcome: CapabilityOutcome::Failed,
            attempts: max_attempts,
            last_error,
        }
    }
}
