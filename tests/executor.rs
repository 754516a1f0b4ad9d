// ABOUTME: Integration tests for the phase executor.
// ABOUTME: Retry, fatal short-circuit, circuit breaking, and per-target isolation.

mod support;

use std::sync::Arc;
use stratus::capability::{CapabilityOutcome, Criticality, PhaseTable};
use stratus::error::Error;
use stratus::exec::PhaseExecutor;
use stratus::orchestrate::CancelFlag;
use stratus::store::DeploymentState;
use stratus::types::Scope;
use support::{
    ScriptedCapability, deployment_id, event_log, events, fast_config, full_registry, init_tracing,
    target, targets,
};

fn single_state() -> DeploymentState {
    DeploymentState::new(
        deployment_id("dep-1"),
        Scope::Single,
        targets(&["api.example.com"]),
    )
}

#[tokio::test]
async fn flaky_capability_succeeds_with_attempt_count() {
    init_tracing();
    let log = event_log();
    let registry = Arc::new(full_registry(
        &log,
        vec![ScriptedCapability::flaky("verify_target", 2, &log)],
    ));
    let executor = PhaseExecutor::new(Arc::clone(&registry), &fast_config());

    let state = single_state();
    let table = PhaseTable::for_scope(Scope::Single);
    let result = executor
        .run_phase(&state, &table, &CancelFlag::new())
        .await
        .unwrap();

    let outcome = &result.outcomes[&target("api.example.com")];
    assert!(outcome.completed());

    let verify = &outcome.results[0];
    assert_eq!(verify.capability, "verify_target");
    assert_eq!(verify.attempts, 3);
    assert_eq!(verify.outcome, CapabilityOutcome::Retried);
    assert!(verify.last_error.is_none());
}

#[tokio::test]
async fn fatal_failure_does_not_retry() {
    let log = event_log();
    let registry = Arc::new(full_registry(
        &log,
        vec![ScriptedCapability::fatal("verify_target", &log)],
    ));
    let executor = PhaseExecutor::new(Arc::clone(&registry), &fast_config());

    let state = single_state();
    let table = PhaseTable::for_scope(Scope::Single);
    let result = executor
        .run_phase(&state, &table, &CancelFlag::new())
        .await
        .unwrap();

    let outcome = &result.outcomes[&target("api.example.com")];
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.capability, "verify_target");
    assert_eq!(failure.criticality, Criticality::Critical);
    assert_eq!(outcome.results[0].attempts, 1);

    // The failing capability halts the target's phase: the next binding
    // never runs.
    assert!(!events(&log).iter().any(|e| e.starts_with("execute:collect_inventory")));
}

#[tokio::test]
async fn non_critical_exhaustion_marks_target_failed() {
    let log = event_log();
    let registry = Arc::new(full_registry(
        &log,
        vec![ScriptedCapability::always_failing("collect_inventory", &log)],
    ));
    let executor = PhaseExecutor::new(Arc::clone(&registry), &fast_config());

    let state = single_state();
    let table = PhaseTable::for_scope(Scope::Single);
    let result = executor
        .run_phase(&state, &table, &CancelFlag::new())
        .await
        .unwrap();

    let outcome = &result.outcomes[&target("api.example.com")];
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.capability, "collect_inventory");
    assert_eq!(failure.criticality, Criticality::NonCritical);

    // verify_target succeeded first and registered its compensation.
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results[0].succeeded());
    assert_eq!(outcome.registered.len(), 1);
    assert_eq!(outcome.results[1].attempts, fast_config().retry.max_attempts);
}

#[tokio::test]
async fn open_circuit_short_circuits_remaining_attempts() {
    let log = event_log();
    let registry = Arc::new(full_registry(
        &log,
        vec![ScriptedCapability::always_failing("verify_target", &log)],
    ));
    let mut config = fast_config();
    config.retry.max_attempts = 5;
    config.breaker.failure_threshold = 2;
    let executor = PhaseExecutor::new(Arc::clone(&registry), &config);

    let state = single_state();
    let table = PhaseTable::for_scope(Scope::Single);
    let result = executor
        .run_phase(&state, &table, &CancelFlag::new())
        .await
        .unwrap();

    let outcome = &result.outcomes[&target("api.example.com")];
    let verify = &outcome.results[0];
    // Two real attempts opened the circuit; the third was never made.
    assert_eq!(verify.attempts, 2);
    assert!(verify.last_error.as_ref().unwrap().contains("circuit open"));
}

#[tokio::test]
async fn unknown_capability_fails_before_any_call() {
    let log = event_log();
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    // Registry is missing everything the table references.
    let registry = Arc::new(stratus::capability::CapabilityRegistry::new());
    let executor = PhaseExecutor::new(registry, &config);

    let state = single_state();
    let table = PhaseTable::for_scope(Scope::Single);
    let err = executor
        .run_phase(&state, &table, &CancelFlag::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownCapability { .. }));
    assert!(events(&log).is_empty());
}

#[tokio::test]
async fn failing_target_does_not_abort_siblings() {
    init_tracing();
    let log = event_log();
    let registry = Arc::new(full_registry(
        &log,
        vec![ScriptedCapability::fatal_for(
            "verify_target",
            "b.example.com",
            &log,
        )],
    ));
    let executor = PhaseExecutor::new(Arc::clone(&registry), &fast_config());

    let state = DeploymentState::new(
        deployment_id("dep-3"),
        Scope::Portfolio,
        targets(&["a.example.com", "b.example.com", "c.example.com"]),
    );
    let table = PhaseTable::for_scope(Scope::Portfolio);
    let result = executor
        .run_phase(&state, &table, &CancelFlag::new())
        .await
        .unwrap();

    assert!(result.outcomes[&target("a.example.com")].completed());
    assert!(result.outcomes[&target("c.example.com")].completed());
    assert!(result.outcomes[&target("b.example.com")].failure.is_some());
}

#[tokio::test]
async fn cancellation_stops_before_the_next_capability() {
    let log = event_log();
    let registry = Arc::new(full_registry(&log, vec![]));
    let executor = PhaseExecutor::new(Arc::clone(&registry), &fast_config());

    let cancel = CancelFlag::new();
    cancel.cancel();

    let state = single_state();
    let table = PhaseTable::for_scope(Scope::Single);
    let result = executor.run_phase(&state, &table, &cancel).await.unwrap();

    let outcome = &result.outcomes[&target("api.example.com")];
    assert!(outcome.cancelled);
    assert!(outcome.results.is_empty());
    assert!(events(&log).is_empty());
}
