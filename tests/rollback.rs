// ABOUTME: Integration tests for compensating rollback.
// ABOUTME: LIFO unwinding, failure tolerance, resume from a persisted cursor.

mod support;

use stratus::rollback::{RollbackOutcome, rollback_all, rollback_target};
use stratus::store::{DeploymentState, MemoryStateStore, RollbackEntry, StateStore};
use stratus::types::{PhaseName, Scope};
use support::{
    Behavior, ScriptedCapability, deployment_id, event_log, events, full_registry, init_tracing,
    target, targets,
};

fn state_with_stack(entries: &[(&str, &str)]) -> DeploymentState {
    let mut state = DeploymentState::new(
        deployment_id("dep-rb"),
        Scope::Portfolio,
        targets(&["a.example.com", "b.example.com"]),
    );
    let phase = PhaseName::new("construct").unwrap();
    for (capability, tgt) in entries {
        state
            .rollback
            .register(RollbackEntry::new(capability, &phase, &target(tgt)));
    }
    state
}

#[tokio::test]
async fn compensations_run_in_reverse_registration_order() {
    init_tracing();
    let log = event_log();
    let registry = full_registry(&log, vec![]);
    let store = MemoryStateStore::new();

    let mut state = state_with_stack(&[
        ("provision_secrets", "a.example.com"),
        ("prepare_database", "a.example.com"),
        ("generate_routing", "a.example.com"),
    ]);

    let outcome = rollback_all(&store, &mut state, &registry).await.unwrap();
    assert_eq!(outcome, RollbackOutcome::FullyRolledBack);

    let compensations: Vec<String> = events(&log)
        .into_iter()
        .filter(|e| e.starts_with("compensate:"))
        .collect();
    assert_eq!(
        compensations,
        vec![
            "compensate:generate_routing:a.example.com",
            "compensate:prepare_database:a.example.com",
            "compensate:provision_secrets:a.example.com",
        ]
    );
    assert!(state.rollback.stack.iter().all(|e| e.compensated));

    // Unwind progress was checkpointed through the store.
    let persisted = store.load(&state.deployment_id).await.unwrap();
    assert_eq!(persisted.rollback, state.rollback);
}

#[tokio::test]
async fn one_broken_compensator_does_not_block_the_rest() {
    let log = event_log();
    let registry = full_registry(
        &log,
        vec![ScriptedCapability::with_failing_compensation(
            "prepare_database",
            Behavior::Ok,
            &log,
        )],
    );
    let store = MemoryStateStore::new();

    let mut state = state_with_stack(&[
        ("provision_secrets", "a.example.com"),
        ("prepare_database", "a.example.com"),
        ("generate_routing", "a.example.com"),
    ]);

    let outcome = rollback_all(&store, &mut state, &registry).await.unwrap();
    let RollbackOutcome::PartiallyRolledBack { failed } = outcome else {
        panic!("expected partial rollback, got {outcome:?}");
    };
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].capability, "prepare_database");

    // The earliest-registered compensation still ran after the failure.
    let compensations: Vec<String> = events(&log)
        .into_iter()
        .filter(|e| e.starts_with("compensate:"))
        .collect();
    assert_eq!(compensations.len(), 3);
    assert_eq!(compensations[2], "compensate:provision_secrets:a.example.com");

    assert!(state.rollback.stack.iter().all(|e| e.compensated));
    assert_eq!(state.rollback.failures().len(), 1);
}

#[tokio::test]
async fn resume_skips_already_compensated_entries() {
    let log = event_log();
    let registry = full_registry(&log, vec![]);
    let store = MemoryStateStore::new();

    let mut state = state_with_stack(&[
        ("provision_secrets", "a.example.com"),
        ("prepare_database", "a.example.com"),
        ("generate_routing", "a.example.com"),
    ]);
    // As if a previous process compensated the top entry, saved, and died.
    state.rollback.stack[2].compensated = true;

    let outcome = rollback_all(&store, &mut state, &registry).await.unwrap();
    assert_eq!(outcome, RollbackOutcome::FullyRolledBack);

    let compensations: Vec<String> = events(&log)
        .into_iter()
        .filter(|e| e.starts_with("compensate:"))
        .collect();
    assert_eq!(
        compensations,
        vec![
            "compensate:prepare_database:a.example.com",
            "compensate:provision_secrets:a.example.com",
        ]
    );
}

#[tokio::test]
async fn target_scoped_rollback_leaves_other_targets_intact() {
    let log = event_log();
    let registry = full_registry(&log, vec![]);
    let store = MemoryStateStore::new();

    let mut state = state_with_stack(&[
        ("provision_secrets", "a.example.com"),
        ("provision_secrets", "b.example.com"),
        ("prepare_database", "a.example.com"),
    ]);

    let outcome = rollback_target(&store, &mut state, &registry, &target("b.example.com"))
        .await
        .unwrap();
    assert_eq!(outcome, RollbackOutcome::FullyRolledBack);

    let compensations: Vec<String> = events(&log)
        .into_iter()
        .filter(|e| e.starts_with("compensate:"))
        .collect();
    assert_eq!(
        compensations,
        vec!["compensate:provision_secrets:b.example.com"]
    );

    assert!(state.rollback.has_pending_for(&target("a.example.com")));
    assert!(!state.rollback.has_pending_for(&target("b.example.com")));
}

#[tokio::test]
async fn empty_stack_unwinds_to_nothing() {
    let log = event_log();
    let registry = full_registry(&log, vec![]);
    let store = MemoryStateStore::new();

    let mut state = state_with_stack(&[]);
    let outcome = rollback_all(&store, &mut state, &registry).await.unwrap();
    assert_eq!(outcome, RollbackOutcome::Nothing);
    assert!(events(&log).is_empty());
}
