use std::collections::BTreeMap;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::config::FleetConfig;
use super::spec::AgentSpec;

/// Immutable view of every known agent, ordered by id.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    specs: BTreeMap<String, Arc<AgentSpec>>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<Arc<AgentSpec>> {
        self.specs.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentSpec>> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// What changed between two snapshots.
#[derive(Debug, Default)]
pub struct RegistryDiff {
    pub added: Vec<Arc<AgentSpec>>,
    pub removed: Vec<String>,
    pub changed: Vec<Arc<AgentSpec>>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Shared registry of agent specs. Readers grab an `Arc` snapshot; a reload
/// replaces the whole snapshot in one step.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl AgentRegistry {
    pub fn new(specs: Vec<AgentSpec>) -> Self {
        Self {
            current: RwLock::new(Arc::new(build_snapshot(specs))),
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(specs_from_config(config))
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentSpec>> {
        self.current.read().get(id)
    }

    /// Install a new set of specs and report how it differs from the old one.
    pub fn swap(&self, specs: Vec<AgentSpec>) -> RegistryDiff {
        let next = Arc::new(build_snapshot(specs));
        let previous = std::mem::replace(&mut *self.current.write(), next.clone());

        let mut diff = RegistryDiff::default();
        for (id, spec) in &next.specs {
            match previous.specs.get(id) {
                None => diff.added.push(spec.clone()),
                Some(old) if old.as_ref() != spec.as_ref() => diff.changed.push(spec.clone()),
                Some(_) => {}
            }
        }
        diff.removed = previous
            .specs
            .keys()
            .filter(|id| !next.specs.contains_key(*id))
            .cloned()
            .collect();
        diff
    }
}

pub fn specs_from_config(config: &FleetConfig) -> Vec<AgentSpec> {
    config
        .agents
        .iter()
        .map(|agent| AgentSpec::from_config(agent, &config.supervisor))
        .collect()
}

fn build_snapshot(specs: Vec<AgentSpec>) -> RegistrySnapshot {
    RegistrySnapshot {
        specs: specs.into_iter().map(|s| (s.id.clone(), Arc::new(s))).collect(),
    }
}
