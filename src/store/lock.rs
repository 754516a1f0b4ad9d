// ABOUTME: Advisory per-deployment locks with bounded wait and auto-expiry.
// ABOUTME: Lock info is stored as JSON so contenders can report the holder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::DeploymentId;

use super::error::{LockHolder, StoreError};

/// Polling interval while waiting for a busy lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Information about who holds a deployment lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Deployment the lock covers.
    pub deployment: String,
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock stops being honored.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(deployment_id: &DeploymentId, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        Self {
            deployment: deployment_id.to_string(),
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            acquired_at,
            expires_at: acquired_at + ttl,
        }
    }

    /// An expired lock no longer excludes contenders and gets broken.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn holder_summary(&self) -> LockHolder {
        LockHolder {
            holder: self.holder.clone(),
            pid: self.pid,
            acquired_at: self.acquired_at,
        }
    }
}

/// A held lock; released explicitly or on drop.
pub struct LockGuard {
    info: LockInfo,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub(crate) fn new(info: LockInfo, release: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            info,
            release: Some(release),
        }
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Release the lock.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("deployment", &self.info.deployment)
            .finish()
    }
}

/// One acquisition attempt against a lock backend.
pub(crate) enum TryAcquire {
    Acquired(LockGuard),
    /// Lock held by a live contender.
    Held(LockInfo),
    /// Backend state changed (expired lock broken); retry without sleeping.
    Retry,
}

/// Poll `attempt` until it acquires, the wait runs out, or an error
/// surfaces. On timeout the current holder is reported in `LockTimeout`.
pub(crate) async fn wait_for_lock(
    deployment_id: &DeploymentId,
    wait: Duration,
    mut attempt: impl FnMut() -> Result<TryAcquire, StoreError>,
) -> Result<LockGuard, StoreError> {
    let deadline = tokio::time::Instant::now() + wait;

    loop {
        match attempt()? {
            TryAcquire::Acquired(guard) => return Ok(guard),
            TryAcquire::Retry => continue,
            TryAcquire::Held(info) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(StoreError::LockTimeout {
                        deployment_id: deployment_id.to_string(),
                        holder: Some(info.holder_summary()),
                    });
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

/// Atomically create a lock file; returns false if it already exists.
pub(crate) fn try_create_lock_file(path: &Path, info: &LockInfo) -> Result<bool, std::io::Error> {
    let json = serde_json::to_string(info)
        .map_err(|e| std::io::Error::other(format!("failed to serialize lock info: {e}")))?;

    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(mut file) => {
            use std::io::Write;
            file.write_all(json.as_bytes())?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read lock info from a lock file; unreadable info means the lock is
/// breakable (a writer crashed mid-write).
pub(crate) fn read_lock_file(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// File-backed acquisition attempt: break expired or unreadable locks with a
/// warning, otherwise report the live holder.
pub(crate) fn attempt_file_lock(
    path: &PathBuf,
    deployment_id: &DeploymentId,
    ttl: Duration,
) -> Result<TryAcquire, StoreError> {
    let info = LockInfo::new(deployment_id, ttl);
    let created = try_create_lock_file(path, &info).map_err(|source| StoreError::Io {
        deployment_id: deployment_id.to_string(),
        source,
    })?;

    if created {
        let release_path = path.clone();
        return Ok(TryAcquire::Acquired(LockGuard::new(
            info,
            Box::new(move || {
                let _ = std::fs::remove_file(&release_path);
            }),
        )));
    }

    match read_lock_file(path) {
        Some(existing) if existing.is_expired() => {
            tracing::warn!(
                deployment = %deployment_id,
                holder = %existing.holder,
                pid = existing.pid,
                "breaking expired deploy lock"
            );
            let _ = std::fs::remove_file(path);
            Ok(TryAcquire::Retry)
        }
        Some(existing) => Ok(TryAcquire::Held(existing)),
        None => {
            tracing::warn!(deployment = %deployment_id, "lock info unreadable, breaking lock");
            let _ = std::fs::remove_file(path);
            Ok(TryAcquire::Retry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_info_records_current_host_and_pid() {
        let id = DeploymentId::new("dep-1".to_string());
        let info = LockInfo::new(&id, Duration::from_secs(60));

        assert_eq!(info.deployment, "dep-1");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
        assert!(!info.is_expired());
    }

    #[test]
    fn zero_ttl_lock_is_expired() {
        let id = DeploymentId::new("dep-1".to_string());
        let info = LockInfo::new(&id, Duration::ZERO);
        assert!(info.is_expired());
    }

    #[test]
    fn lock_file_create_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dep-1.lock");
        let id = DeploymentId::new("dep-1".to_string());
        let info = LockInfo::new(&id, Duration::from_secs(60));

        assert!(try_create_lock_file(&path, &info).unwrap());
        assert!(!try_create_lock_file(&path, &info).unwrap());

        let read = read_lock_file(&path).unwrap();
        assert_eq!(read.deployment, "dep-1");
    }

    #[test]
    fn unreadable_lock_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dep-1.lock");
        std::fs::write(&path, "not json").unwrap();
        assert!(read_lock_file(&path).is_none());
    }
}
