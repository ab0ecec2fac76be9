use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    pub supervisor: SupervisorConfig,
    pub agents: Vec<AgentConfig>,
    pub maintenance: Vec<MaintenanceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on every request when set.
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "./data/fleetd.db".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(with = "super::duration")]
    pub lease_ttl: Duration,
    pub max_requeues: u32,
    /// Dead-letter count above which `/status` reports resource exhaustion.
    pub dead_letter_alert: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(300),
            max_requeues: 3,
            dead_letter_alert: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_batch: usize,
    /// Accept a result for a job whose lease expired but which has not been
    /// handed to another worker yet.
    pub accept_late_results: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_batch: 100,
            accept_late_results: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    #[serde(with = "super::duration")]
    pub tick: Duration,
    #[serde(with = "super::duration")]
    pub grace_period: Duration,
    #[serde(with = "super::duration")]
    pub health_interval: Duration,
    #[serde(with = "super::duration")]
    pub probe_timeout: Duration,
    pub restart: RestartConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            grace_period: Duration::from_secs(10),
            health_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            restart: RestartConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestartConfig {
    pub max_retries: u32,
    #[serde(with = "super::duration")]
    pub backoff_base: Duration,
    #[serde(with = "super::duration")]
    pub backoff_cap: Duration,
    pub failure_threshold: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            failure_threshold: 3,
        }
    }
}

/// Per-agent restart overrides; unset fields fall back to `supervisor.restart`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RestartOverrides {
    pub max_retries: Option<u32>,
    #[serde(default, with = "super::duration::option")]
    pub backoff_base: Option<Duration>,
    #[serde(default, with = "super::duration::option")]
    pub backoff_cap: Option<Duration>,
    pub failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub id: String,
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_instances")]
    pub instances: u32,
    #[serde(default, with = "super::duration::option")]
    pub health_interval: Option<Duration>,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub restart: RestartOverrides,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_instances() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeConfig {
    #[default]
    Process,
    Http {
        url: String,
        #[serde(default, with = "super::duration::option")]
        timeout: Option<Duration>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    pub name: String,
    #[serde(with = "super::duration")]
    pub every: Duration,
    pub action: MaintenanceActionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MaintenanceActionConfig {
    Command {
        command: Vec<String>,
        working_dir: Option<PathBuf>,
        #[serde(default, with = "super::duration::option")]
        timeout: Option<Duration>,
    },
    ReloadAgents,
}
