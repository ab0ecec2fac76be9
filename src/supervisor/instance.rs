use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::agents::AgentSpec;
use crate::process::ProcessHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Starting,
    Running,
    Unhealthy,
    Restarting,
    Stopping,
    Stopped,
    Failed,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
            Self::Restarting => "restarting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub const ALL: [InstanceState; 7] = [
        Self::Starting,
        Self::Running,
        Self::Unhealthy,
        Self::Restarting,
        Self::Stopping,
        Self::Stopped,
        Self::Failed,
    ];

    /// States in which the instance owns a live process that gets probed.
    pub fn is_probed(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Unhealthy)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) struct Instance {
    pub spec: Arc<AgentSpec>,
    pub index: u32,
    pub state: InstanceState,
    pub handle: Option<Arc<dyn ProcessHandle>>,
    pub generation: u64,
    pub failure_count: u32,
    pub probe_failures: u32,
    pub restarts: u64,
    pub restart_at: Option<DateTime<Utc>>,
    pub last_restart: Option<DateTime<Utc>>,
    pub last_health: Option<DateTime<Utc>>,
    pub next_probe: Option<DateTime<Utc>>,
    pub running_since: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
}

impl Instance {
    pub fn new(spec: Arc<AgentSpec>, index: u32) -> Self {
        Self {
            spec,
            index,
            state: InstanceState::Starting,
            handle: None,
            generation: 0,
            failure_count: 0,
            probe_failures: 0,
            restarts: 0,
            restart_at: None,
            last_restart: None,
            last_health: None,
            next_probe: None,
            running_since: None,
            last_message: None,
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> InstanceSnapshot {
        InstanceSnapshot {
            agent_id: self.spec.id.clone(),
            index: self.index,
            state: self.state,
            pid: self.handle.as_ref().and_then(|h| h.pid()),
            failure_count: self.failure_count,
            probe_failures: self.probe_failures,
            restarts: self.restarts,
            restart_at: self.restart_at,
            last_restart: self.last_restart,
            last_health: self.last_health,
            running_since: self.running_since,
            uptime_secs: self
                .running_since
                .map(|since| (now - since).num_milliseconds().max(0) as f64 / 1000.0),
            last_message: self.last_message.clone(),
        }
    }
}

/// Read-only view of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub agent_id: String,
    pub index: u32,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub failure_count: u32,
    pub probe_failures: u32,
    pub restarts: u64,
    pub restart_at: Option<DateTime<Utc>>,
    pub last_restart: Option<DateTime<Utc>>,
    pub last_health: Option<DateTime<Utc>>,
    pub running_since: Option<DateTime<Utc>>,
    pub uptime_secs: Option<f64>,
    pub last_message: Option<String>,
}
