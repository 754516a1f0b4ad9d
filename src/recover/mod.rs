// ABOUTME: Detects interrupted or corrupt deployments and resumes from the last checkpoint.
// ABOUTME: Each recovery appends exactly one totally ordered RecoveryRecord.

use crate::error::Error;
use crate::store::{RecoveryRecord, StateStore, StoreError, StoreErrorKind};
use crate::types::{DeploymentId, PhaseName};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// What `detect` concluded about a deployment.
#[derive(Debug, Clone, PartialEq)]
pub enum Health {
    /// No persisted state yet.
    Fresh,
    /// Terminal, actively coordinated, or not yet past its first checkpoint.
    Healthy,
    /// A checkpoint exists, no terminal status is recorded, and nobody holds
    /// the lock: the coordinating process died mid-phase.
    Interrupted { phase: PhaseName },
    /// Checksum or schema violation; requires manual intervention.
    Corrupt,
}

/// Detects interruption and resumes deployments from their last checkpoint.
pub struct RecoveryManager<S> {
    store: Arc<S>,
}

impl<S: StateStore> RecoveryManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn detect(&self, id: &DeploymentId) -> Result<Health, StoreError> {
        let state = match self.store.load(id).await {
            Ok(state) => state,
            Err(e) => {
                return match e.kind() {
                    StoreErrorKind::NotFound => Ok(Health::Fresh),
                    StoreErrorKind::CorruptState | StoreErrorKind::UnsupportedVersion => {
                        Ok(Health::Corrupt)
                    }
                    _ => Err(e),
                };
            }
        };

        // Terminal, never driven past a checkpoint, or already recovered for
        // the current drive epoch: a plain (re)start covers all of these
        // without a recovery event.
        if !state.interruption_pending() {
            return Ok(Health::Healthy);
        }

        // A live coordinator always holds the deployment lock while driving
        // a phase.
        if self.store.lock_holder(id).await?.is_some() {
            return Ok(Health::Healthy);
        }

        Ok(Health::Interrupted {
            phase: state.phase.clone(),
        })
    }

    /// Resume an interrupted deployment at the start of its in-flight phase.
    ///
    /// The record id is generated under the store lock, so racing recovery
    /// attempts cannot duplicate or reorder records.
    ///
    /// # Errors
    ///
    /// `NotInterrupted` when the deployment no longer needs recovery by the
    /// time the lock is held.
    pub async fn recover(
        &self,
        id: &DeploymentId,
        lock_wait: Duration,
    ) -> Result<RecoveryRecord, Error> {
        let guard = self.store.lock(id, lock_wait).await?;
        let mut state = self.store.load(id).await?;

        if !state.interruption_pending() {
            return Err(Error::NotInterrupted(id.clone()));
        }
        let Some(checkpoint) = state.checkpoint.clone() else {
            return Err(Error::NotInterrupted(id.clone()));
        };
        let record = RecoveryRecord {
            recovery_id: state.next_recovery_id(),
            from_phase: state.phase.clone(),
            detected_issue: format!(
                "interrupted run: checkpoint '{}' present with no terminal status",
                checkpoint
            ),
            action_taken: format!("resumed at start of phase '{}'", state.phase),
            at: Utc::now(),
        };

        tracing::info!(
            deployment = %id,
            recovery_id = record.recovery_id,
            phase = %record.from_phase,
            "recovering interrupted deployment"
        );

        state.recovered_epoch = state.drive_epoch;
        state.recovery_history.push(record.clone());
        self.store.save(&state).await?;
        guard.release();

        Ok(record)
    }

    /// Recovery history in chronological order.
    pub async fn history(&self, id: &DeploymentId) -> Result<Vec<RecoveryRecord>, StoreError> {
        Ok(self.store.load(id).await?.recovery_history)
    }
}
