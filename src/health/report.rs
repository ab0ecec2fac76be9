use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::agents::ProbeSpec;
use crate::process::ProcessHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Alive,
    Failed,
    TimedOut,
    Exited { code: Option<i32> },
}

impl ProbeOutcome {
    pub fn is_alive(&self) -> bool {
        matches!(self, ProbeOutcome::Alive)
    }
}

/// One instance due for a probe, as handed out by the supervisor.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub agent_id: String,
    pub index: u32,
    /// Launch counter of the instance; reports for an older launch are ignored.
    pub generation: u64,
    pub probe: ProbeSpec,
    pub handle: Arc<dyn ProcessHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub agent_id: String,
    pub index: u32,
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
    pub alive: bool,
    pub message: Option<String>,
    pub outcome: ProbeOutcome,
}

impl HealthReport {
    pub fn new(target: &ProbeTarget, outcome: ProbeOutcome, message: Option<String>) -> Self {
        Self {
            agent_id: target.agent_id.clone(),
            index: target.index,
            generation: target.generation,
            timestamp: Utc::now(),
            alive: outcome.is_alive(),
            message,
            outcome,
        }
    }
}
