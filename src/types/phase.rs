// ABOUTME: Phase names and the standard deployment phase topology.
// ABOUTME: The topology is data carried in persisted state, not a hard-coded enum.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

pub const ASSESS: &str = "assess";
pub const CONSTRUCT: &str = "construct";
pub const ORCHESTRATE: &str = "orchestrate";
pub const EXECUTE: &str = "execute";

#[derive(Debug, Error)]
pub enum PhaseNameError {
    #[error("phase name cannot be empty")]
    Empty,

    #[error("phase name must be lowercase")]
    NotLowercase,

    #[error("invalid character in phase name: '{0}'")]
    InvalidChar(char),
}

/// A named deployment phase.
///
/// Phases are identifiers rather than enum variants: the phase topology for a
/// deployment is persisted alongside its state, so an older deployment keeps
/// resuming against the topology it was started with even after the standard
/// topology grows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PhaseName(String);

impl PhaseName {
    pub fn new(value: &str) -> Result<Self, PhaseNameError> {
        if value.is_empty() {
            return Err(PhaseNameError::Empty);
        }
        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(PhaseNameError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '_' {
                return Err(PhaseNameError::InvalidChar(c));
            }
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for PhaseName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        PhaseName::new(&value).map_err(serde::de::Error::custom)
    }
}

/// The standard fixed phase topology: assess, construct, orchestrate, execute.
pub fn standard_phases() -> Vec<PhaseName> {
    [ASSESS, CONSTRUCT, ORCHESTRATE, EXECUTE]
        .iter()
        .map(|name| PhaseName::new(name).expect("standard phase names are valid"))
        .collect()
}
