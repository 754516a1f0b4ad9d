// ABOUTME: Capability registry and declarative phase-to-capability tables.
// ABOUTME: Scope variants supply different tables, not overridden methods.

use super::{Capability, Criticality};
use crate::types::{ASSESS, CONSTRUCT, EXECUTE, ORCHESTRATE, PhaseName, Scope};
use std::collections::HashMap;
use std::sync::Arc;

/// Named capability lookup for a deployment run.
///
/// Phase tables reference capabilities by name; an unbound name is a
/// configuration error caught before the phase starts.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities
            .insert(capability.name().to_string(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &names)
            .finish()
    }
}

/// One capability bound into a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityBinding {
    pub name: String,
    pub criticality: Criticality,
}

impl CapabilityBinding {
    pub fn critical(name: &str) -> Self {
        Self {
            name: name.to_string(),
            criticality: Criticality::Critical,
        }
    }

    pub fn non_critical(name: &str) -> Self {
        Self {
            name: name.to_string(),
            criticality: Criticality::NonCritical,
        }
    }
}

/// Ordered capability bindings per phase for one scope.
#[derive(Debug, Clone)]
pub struct PhaseTable {
    entries: Vec<(PhaseName, Vec<CapabilityBinding>)>,
}

impl PhaseTable {
    /// The declarative table for a scope.
    ///
    /// Portfolio adds cross-target secret coordination to construct;
    /// enterprise additionally binds compliance and audit capabilities.
    pub fn for_scope(scope: Scope) -> Self {
        let mut assess = vec![
            CapabilityBinding::critical("verify_target"),
            CapabilityBinding::non_critical("collect_inventory"),
        ];
        let mut construct = vec![
            CapabilityBinding::critical("provision_secrets"),
            CapabilityBinding::critical("prepare_database"),
        ];
        let orchestrate = vec![
            CapabilityBinding::critical("generate_routing"),
            CapabilityBinding::non_critical("distribute_config"),
        ];
        let mut execute = vec![
            CapabilityBinding::critical("deploy_artifact"),
            CapabilityBinding::critical("verify_health"),
        ];

        match scope {
            Scope::Single => {}
            Scope::Portfolio => {
                construct.push(CapabilityBinding::critical("coordinate_shared_secrets"));
            }
            Scope::Enterprise => {
                construct.push(CapabilityBinding::critical("coordinate_shared_secrets"));
                assess.push(CapabilityBinding::non_critical("compliance_scan"));
                execute.push(CapabilityBinding::non_critical("record_audit_trail"));
            }
        }

        let phase = |name: &str| PhaseName::new(name).expect("standard phase names are valid");
        Self {
            entries: vec![
                (phase(ASSESS), assess),
                (phase(CONSTRUCT), construct),
                (phase(ORCHESTRATE), orchestrate),
                (phase(EXECUTE), execute),
            ],
        }
    }

    pub fn bindings(&self, phase: &PhaseName) -> &[CapabilityBinding] {
        self.entries
            .iter()
            .find(|(name, _)| name == phase)
            .map(|(_, bindings)| bindings.as_slice())
            .unwrap_or(&[])
    }

    /// All capability names referenced anywhere in the table.
    pub fn capability_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .iter()
            .flat_map(|(_, bindings)| bindings.iter().map(|b| b.name.as_str()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
