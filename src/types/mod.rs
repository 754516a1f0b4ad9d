// ABOUTME: Core domain types shared across the crate.
// ABOUTME: Exports validated newtypes and phantom-typed identifiers.

mod id;
mod phase;
mod scope;
mod target;

pub use id::{ActionId, ActionMarker, DeploymentId, DeploymentMarker, Id};
pub use phase::{ASSESS, CONSTRUCT, EXECUTE, ORCHESTRATE, PhaseName, PhaseNameError, standard_phases};
pub use scope::Scope;
pub use target::{TargetName, TargetNameError};
