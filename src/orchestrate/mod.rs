// ABOUTME: Deployment orchestration: phase loop, checkpoints, and the unified facade.
// ABOUTME: Exports the orchestrator, status reports, and cooperative cancellation.

mod facade;
mod orchestrator;
mod report;

pub use facade::Deployer;
pub use orchestrator::Orchestrator;
pub use report::{StatusReport, TargetReport};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag.
///
/// Checked before lock acquisition and between capability invocations; an
/// in-flight capability call runs to its own timeout rather than being
/// forcibly killed, so no half-applied side effect goes unrecorded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
