// ABOUTME: State store error types with SNAFU pattern.
// ABOUTME: Unifies corruption, versioning, and locking failures for programmatic handling.

use chrono::{DateTime, Utc};
use snafu::Snafu;

/// Identity of a lock holder, surfaced on lock contention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub holder: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Errors from the durable state store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("no state found for deployment {deployment_id}"))]
    NotFound { deployment_id: String },

    #[snafu(display("corrupt state for deployment {deployment_id}: {reason}"))]
    CorruptState {
        deployment_id: String,
        reason: String,
    },

    #[snafu(display(
        "unsupported schema version {found} for deployment {deployment_id} (supported up to {supported})"
    ))]
    UnsupportedVersion {
        deployment_id: String,
        found: u64,
        supported: u32,
    },

    #[snafu(display("timed out waiting for deploy lock on {deployment_id}"))]
    LockTimeout {
        deployment_id: String,
        holder: Option<LockHolder>,
    },

    #[snafu(display("invalid deployment id '{deployment_id}'"))]
    InvalidId { deployment_id: String },

    #[snafu(display("state I/O error for deployment {deployment_id}: {source}"))]
    Io {
        deployment_id: String,
        source: std::io::Error,
    },

    #[snafu(display("state serialization error for deployment {deployment_id}: {source}"))]
    Serialize {
        deployment_id: String,
        source: serde_json::Error,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    /// Checksum or schema violation; requires recovery or manual intervention.
    CorruptState,
    /// No migration path; fatal.
    UnsupportedVersion,
    /// Advisory lock contention; retryable by the caller.
    LockTimeout,
    InvalidId,
    Io,
    Serialize,
}

impl StoreError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::NotFound { .. } => StoreErrorKind::NotFound,
            StoreError::CorruptState { .. } => StoreErrorKind::CorruptState,
            StoreError::UnsupportedVersion { .. } => StoreErrorKind::UnsupportedVersion,
            StoreError::LockTimeout { .. } => StoreErrorKind::LockTimeout,
            StoreError::InvalidId { .. } => StoreErrorKind::InvalidId,
            StoreError::Io { .. } => StoreErrorKind::Io,
            StoreError::Serialize { .. } => StoreErrorKind::Serialize,
        }
    }

    /// Lock holder details if this is a lock timeout with a known holder.
    pub fn lock_holder(&self) -> Option<&LockHolder> {
        match self {
            StoreError::LockTimeout { holder, .. } => holder.as_ref(),
            _ => None,
        }
    }
}
