use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use serde::Serialize;
use crate::config::{AgentConfig, ProbeConfig, SupervisorConfig};

/// Resolved, immutable description of one agent role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSpec {
    pub id: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub instances: u32,
    pub restart: RestartPolicy,
    pub health_interval: Duration,
    pub probe: ProbeSpec,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestartPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Consecutive failed probes needed before a failure is confirmed.
    pub failure_threshold: u32,
}

impl RestartPolicy {
    /// Delay before the restart that brings `failure_count` to its current value:
    /// `min(base * 2^(failure_count - 1), cap)`.
    pub fn backoff(&self, failure_count: u32) -> Duration {
        let exponent = failure_count.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_cap)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeSpec {
    Process { timeout: Duration },
    Http { url: String, timeout: Duration },
}

impl ProbeSpec {
    pub fn timeout(&self) -> Duration {
        match self {
            ProbeSpec::Process { timeout } | ProbeSpec::Http { timeout, .. } => *timeout,
        }
    }
}

impl AgentSpec {
    /// Resolve an agent entry against the supervisor-wide defaults.
    pub fn from_config(agent: &AgentConfig, defaults: &SupervisorConfig) -> Self {
        let base = &defaults.restart;
        let restart = RestartPolicy {
            max_retries: agent.restart.max_retries.unwrap_or(base.max_retries),
            backoff_base: agent.restart.backoff_base.unwrap_or(base.backoff_base),
            backoff_cap: agent.restart.backoff_cap.unwrap_or(base.backoff_cap),
            failure_threshold: agent.restart.failure_threshold.unwrap_or(base.failure_threshold).max(1),
        };
        let probe = match &agent.probe {
            ProbeConfig::Process => ProbeSpec::Process { timeout: defaults.probe_timeout },
            ProbeConfig::Http { url, timeout } => ProbeSpec::Http {
                url: url.clone(),
                timeout: timeout.unwrap_or(defaults.probe_timeout),
            },
        };
        let mut command = agent.command.iter().cloned();
        Self {
            id: agent.id.clone(),
            program: command.next().unwrap_or_default(),
            args: command.collect(),
            working_dir: agent.working_dir.clone(),
            instances: agent.instances,
            restart,
            health_interval: agent.health_interval.unwrap_or(defaults.health_interval),
            probe,
            env: agent.env.clone(),
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
