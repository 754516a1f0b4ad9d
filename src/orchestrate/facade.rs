// ABOUTME: Unified deployment facade: start, status, cancel, history, archive.
// ABOUTME: Selects the scope variant and exposes one execution surface.

use crate::capability::CapabilityRegistry;
use crate::config::OrchestratorConfig;
use crate::error::Error;
use crate::recover::{Health, RecoveryManager};
use crate::store::{DeploymentState, DeploymentStatus, RecoveryRecord, StateStore, StoreError};
use crate::types::{DeploymentId, Scope, TargetName};
use nonempty::NonEmpty;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{CancelFlag, Orchestrator, StatusReport};

/// One execution surface over every deployment scope.
///
/// The facade loads-or-initializes state, recovers interrupted runs, and
/// drives the orchestrator; interactive callers consume `status()` and
/// `history()` by polling rather than hooking into orchestration internals.
pub struct Deployer<S> {
    store: Arc<S>,
    registry: Arc<CapabilityRegistry>,
    config: OrchestratorConfig,
    recovery: RecoveryManager<S>,
    cancels: Mutex<HashMap<String, CancelFlag>>,
}

impl<S: StateStore> Deployer<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<CapabilityRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let recovery = RecoveryManager::new(Arc::clone(&store));
        Self {
            store,
            registry,
            config,
            recovery,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Start or resume a deployment and drive it to a terminal status.
    ///
    /// Starting an unknown id initializes fresh state under the deployment
    /// lock; starting an interrupted one records a recovery and resumes at
    /// the last checkpoint; starting a terminal one returns the stored
    /// result without re-executing any side effect.
    pub async fn start(
        &self,
        id: &DeploymentId,
        scope: Scope,
        targets: NonEmpty<TargetName>,
    ) -> Result<StatusReport, Error> {
        match self.recovery.detect(id).await? {
            Health::Fresh => self.initialize(id, scope, targets).await?,
            Health::Corrupt => {
                // Surface the underlying corruption error verbatim.
                self.store.load(id).await?;
            }
            Health::Interrupted { .. } => {
                match self.recovery.recover(id, self.config.lock.wait_timeout).await {
                    Ok(record) => tracing::info!(
                        deployment = %id,
                        recovery_id = record.recovery_id,
                        "resuming interrupted deployment"
                    ),
                    // Another contender recovered it first; carry on.
                    Err(Error::NotInterrupted(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Health::Healthy => {}
        }

        let cancel = self.fresh_cancel_flag(id);
        let orchestrator = Orchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.clone(),
            cancel,
        );
        orchestrator.execute(id).await
    }

    /// Current deployment snapshot: phase, status, per-target progress.
    pub async fn status(&self, id: &DeploymentId) -> Result<StatusReport, Error> {
        let state = self.store.load(id).await?;
        Ok(StatusReport::from_state(&state))
    }

    /// Request cooperative cancellation of an in-flight run.
    pub async fn cancel(&self, id: &DeploymentId) -> Result<(), Error> {
        if !self.store.exists(id).await? {
            return Err(Error::Store(StoreError::NotFound {
                deployment_id: id.to_string(),
            }));
        }
        if let Some(flag) = self.cancels.lock().get(id.as_str()) {
            flag.cancel();
        }
        Ok(())
    }

    /// Recovery history, chronologically ordered, for audit.
    pub async fn history(&self, id: &DeploymentId) -> Result<Vec<RecoveryRecord>, Error> {
        Ok(self.recovery.history(id).await?)
    }

    /// Remove a successfully finished deployment from the store.
    ///
    /// Failed and rolled-back runs are retained for audit and are not
    /// archivable.
    pub async fn archive(&self, id: &DeploymentId) -> Result<(), Error> {
        let state = self.store.load(id).await?;
        if state.status != DeploymentStatus::Success {
            return Err(Error::NotArchivable {
                id: id.clone(),
                status: state.status,
            });
        }
        self.store.delete(id).await?;
        self.cancels.lock().remove(id.as_str());
        Ok(())
    }

    async fn initialize(
        &self,
        id: &DeploymentId,
        scope: Scope,
        targets: NonEmpty<TargetName>,
    ) -> Result<(), Error> {
        let guard = self
            .store
            .lock(id, self.config.lock.wait_timeout)
            .await?;
        // A concurrent starter may have initialized between detect and lock.
        if !self.store.exists(id).await? {
            let state = DeploymentState::new(id.clone(), scope, targets);
            self.store.save(&state).await?;
            tracing::info!(deployment = %id, scope = %scope, "initialized deployment");
        }
        guard.release();
        Ok(())
    }

    /// Each start gets a fresh flag, so an old cancellation cannot leak into
    /// a resumed run.
    fn fresh_cancel_flag(&self, id: &DeploymentId) -> CancelFlag {
        let flag = CancelFlag::new();
        self.cancels
            .lock()
            .insert(id.as_str().to_string(), flag.clone());
        flag
    }
}
