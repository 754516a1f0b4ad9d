// ABOUTME: Durable deployment state: checksummed storage, locking, versioning.
// ABOUTME: The store is the only shared mutable resource in the system.

mod error;
mod file;
mod lock;
mod state;
mod version;

pub use error::{LockHolder, StoreError, StoreErrorKind};
pub use file::{FileStateStore, MemoryStateStore, StateStore};
pub use lock::{LockGuard, LockInfo};
pub use state::{
    DeploymentState, DeploymentStatus, RecoveryRecord, RollbackEntry, RollbackFailure,
    RollbackState, TargetState, TargetStatus,
};
pub use version::{SCHEMA_VERSION, migrate};
