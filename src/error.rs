// ABOUTME: Application-wide error types for stratus.
// ABOUTME: Uses thiserror for ergonomic error handling.

use crate::store::{DeploymentStatus, StoreError};
use crate::types::{DeploymentId, PhaseName};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Store-level failure: lock contention, corruption, versioning, I/O.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A phase table references a capability the registry cannot resolve.
    #[error("unknown capability '{name}' bound to phase '{phase}'")]
    UnknownCapability { name: String, phase: PhaseName },

    #[error("deployment {0} was cancelled")]
    Cancelled(DeploymentId),

    /// Recovery requested for a deployment that no longer needs it.
    #[error("deployment {0} does not need recovery")]
    NotInterrupted(DeploymentId),

    /// Only successfully finished deployments may be archived.
    #[error("deployment {id} is not archivable while {status}")]
    NotArchivable {
        id: DeploymentId,
        status: DeploymentStatus,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
