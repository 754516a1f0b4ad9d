// ABOUTME: Durable keyed state storage with checksum verification.
// ABOUTME: File-backed store for production, memory-backed store for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::types::DeploymentId;

use super::error::{LockHolder, StoreError};
use super::lock::{self, LockGuard, LockInfo, TryAcquire};
use super::state::DeploymentState;
use super::version;

/// Durable keyed storage of deployment state.
///
/// Implementations guarantee atomic single-key writes, read-after-write
/// consistency, and exclusive timed locks. All keys are scoped by
/// deployment id; writes for distinct ids never contend.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load and verify a deployment's state.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id has no state, `CorruptState` on checksum or
    /// shape violations, `UnsupportedVersion` when no migration path exists.
    async fn load(&self, id: &DeploymentId) -> Result<DeploymentState, StoreError>;

    /// Atomically persist a deployment's state.
    async fn save(&self, state: &DeploymentState) -> Result<(), StoreError>;

    async fn exists(&self, id: &DeploymentId) -> Result<bool, StoreError>;

    /// Remove a deployment's state (archival of terminal runs).
    async fn delete(&self, id: &DeploymentId) -> Result<(), StoreError>;

    /// Acquire the deployment's exclusive advisory lock, waiting at most
    /// `wait` before failing with `LockTimeout`.
    async fn lock(&self, id: &DeploymentId, wait: Duration) -> Result<LockGuard, StoreError>;

    /// Current live lock holder, if any. Expired locks read as absent.
    async fn lock_holder(&self, id: &DeploymentId) -> Result<Option<LockHolder>, StoreError>;
}

/// Store-internal wrapper persisted to disk. The checksum covers the whole
/// payload (timestamp included), so any byte flip is detected on load.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    payload: Payload,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    saved_at: DateTime<Utc>,
    state: serde_json::Value,
}

fn checksum_of(payload: &Payload) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// File-backed state store: one JSON document per deployment id under a
/// state directory, written atomically via temp file + rename.
pub struct FileStateStore {
    dir: PathBuf,
    lock_ttl: Duration,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_ttl: Duration::from_secs(30 * 60),
        }
    }

    /// Override how long held locks live before contenders break them.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    fn state_path(&self, id: &DeploymentId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn lock_path(&self, id: &DeploymentId) -> PathBuf {
        self.dir.join(format!("{}.lock", id))
    }

    /// Deployment ids become file names; reject anything that could escape
    /// the state directory.
    fn check_id(id: &DeploymentId) -> Result<(), StoreError> {
        let value = id.as_str();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && value != "."
            && value != "..";

        if valid {
            Ok(())
        } else {
            Err(StoreError::InvalidId {
                deployment_id: value.to_string(),
            })
        }
    }

    fn ensure_dir(&self, id: &DeploymentId) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            deployment_id: id.to_string(),
            source,
        })
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, id: &DeploymentId) -> Result<DeploymentState, StoreError> {
        Self::check_id(id)?;
        let path = self.state_path(id);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    deployment_id: id.to_string(),
                });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    deployment_id: id.to_string(),
                    source,
                });
            }
        };

        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::CorruptState {
                deployment_id: id.to_string(),
                reason: format!("unreadable envelope: {e}"),
            })?;

        let computed = checksum_of(&envelope.payload).map_err(|source| StoreError::Serialize {
            deployment_id: id.to_string(),
            source,
        })?;
        if computed != envelope.checksum {
            return Err(StoreError::CorruptState {
                deployment_id: id.to_string(),
                reason: format!(
                    "checksum mismatch: stored {}, computed {}",
                    envelope.checksum, computed
                ),
            });
        }

        let migrated = version::migrate(id.as_str(), envelope.payload.state)?;

        serde_json::from_value(migrated).map_err(|e| StoreError::CorruptState {
            deployment_id: id.to_string(),
            reason: format!("state shape violation: {e}"),
        })
    }

    async fn save(&self, state: &DeploymentState) -> Result<(), StoreError> {
        let id = &state.deployment_id;
        Self::check_id(id)?;
        self.ensure_dir(id)?;

        let value = serde_json::to_value(state).map_err(|source| StoreError::Serialize {
            deployment_id: id.to_string(),
            source,
        })?;
        let payload = Payload {
            saved_at: Utc::now(),
            state: value,
        };
        let checksum = checksum_of(&payload).map_err(|source| StoreError::Serialize {
            deployment_id: id.to_string(),
            source,
        })?;
        let envelope = Envelope { checksum, payload };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(|source| StoreError::Serialize {
            deployment_id: id.to_string(),
            source,
        })?;

        let path = self.state_path(id);
        let tmp = self.dir.join(format!("{}.json.tmp", id));
        let io_err = |source| StoreError::Io {
            deployment_id: id.to_string(),
            source,
        };
        std::fs::write(&tmp, &bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;

        Ok(())
    }

    async fn exists(&self, id: &DeploymentId) -> Result<bool, StoreError> {
        Self::check_id(id)?;
        Ok(self.state_path(id).exists())
    }

    async fn delete(&self, id: &DeploymentId) -> Result<(), StoreError> {
        Self::check_id(id)?;
        match std::fs::remove_file(self.state_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                deployment_id: id.to_string(),
            }),
            Err(source) => Err(StoreError::Io {
                deployment_id: id.to_string(),
                source,
            }),
        }
    }

    async fn lock(&self, id: &DeploymentId, wait: Duration) -> Result<LockGuard, StoreError> {
        Self::check_id(id)?;
        self.ensure_dir(id)?;
        let path = self.lock_path(id);
        let ttl = self.lock_ttl;
        lock::wait_for_lock(id, wait, || lock::attempt_file_lock(&path, id, ttl)).await
    }

    async fn lock_holder(&self, id: &DeploymentId) -> Result<Option<LockHolder>, StoreError> {
        Self::check_id(id)?;
        Ok(lock::read_lock_file(&self.lock_path(id))
            .filter(|info| !info.is_expired())
            .map(|info| info.holder_summary()))
    }
}

/// In-memory state store for tests: same surface, no durability.
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, DeploymentState>>,
    locks: Arc<Mutex<HashMap<String, LockInfo>>>,
    lock_ttl: Duration,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            locks: Arc::new(Mutex::new(HashMap::new())),
            lock_ttl: Duration::from_secs(30 * 60),
        }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    fn attempt_memory_lock(
        locks: &Arc<Mutex<HashMap<String, LockInfo>>>,
        id: &DeploymentId,
        ttl: Duration,
    ) -> TryAcquire {
        let mut table = locks.lock();
        match table.get(id.as_str()) {
            Some(existing) if !existing.is_expired() => TryAcquire::Held(existing.clone()),
            _ => {
                let info = LockInfo::new(id, ttl);
                table.insert(id.as_str().to_string(), info.clone());

                let locks = Arc::clone(locks);
                let key = id.as_str().to_string();
                let token = info.acquired_at;
                TryAcquire::Acquired(LockGuard::new(
                    info,
                    Box::new(move || {
                        let mut table = locks.lock();
                        if table.get(&key).is_some_and(|held| held.acquired_at == token) {
                            table.remove(&key);
                        }
                    }),
                ))
            }
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, id: &DeploymentId) -> Result<DeploymentState, StoreError> {
        self.states
            .lock()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                deployment_id: id.to_string(),
            })
    }

    async fn save(&self, state: &DeploymentState) -> Result<(), StoreError> {
        self.states
            .lock()
            .insert(state.deployment_id.as_str().to_string(), state.clone());
        Ok(())
    }

    async fn exists(&self, id: &DeploymentId) -> Result<bool, StoreError> {
        Ok(self.states.lock().contains_key(id.as_str()))
    }

    async fn delete(&self, id: &DeploymentId) -> Result<(), StoreError> {
        self.states
            .lock()
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                deployment_id: id.to_string(),
            })
    }

    async fn lock(&self, id: &DeploymentId, wait: Duration) -> Result<LockGuard, StoreError> {
        let locks = Arc::clone(&self.locks);
        let ttl = self.lock_ttl;
        lock::wait_for_lock(id, wait, || {
            Ok(Self::attempt_memory_lock(&locks, id, ttl))
        })
        .await
    }

    async fn lock_holder(&self, id: &DeploymentId) -> Result<Option<LockHolder>, StoreError> {
        Ok(self
            .locks
            .lock()
            .get(id.as_str())
            .filter(|info| !info.is_expired())
            .map(|info| info.holder_summary()))
    }
}
