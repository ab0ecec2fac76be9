use std::path::PathBuf;
use std::sync::Arc;
use chrono::Utc;
use crate::agents::AgentRegistry;
use crate::config::FleetConfig;
use crate::dispatch::{DispatchPolicy, Dispatcher};
use crate::errors::FleetError;
use crate::health::HealthMonitor;
use crate::maintenance::MaintenanceScheduler;
use crate::process::ProcessLauncher;
use crate::queue::{JobQueue, QueuePolicy};
use crate::sink::ResultSink;
use crate::supervisor::Supervisor;

/// Everything the control loop and the HTTP API share.
pub struct FleetContext {
    pub config: FleetConfig,
    /// Source of `config`, re-read on reload.
    pub config_path: Option<PathBuf>,
    pub registry: AgentRegistry,
    pub queue: Arc<JobQueue>,
    pub sink: ResultSink,
    pub supervisor: Arc<Supervisor>,
    pub dispatcher: Arc<Dispatcher>,
    pub monitor: HealthMonitor,
    pub maintenance: MaintenanceScheduler,
}

impl FleetContext {
    pub fn new(
        config: FleetConfig,
        config_path: Option<PathBuf>,
        launcher: Arc<dyn ProcessLauncher>,
        sink: ResultSink,
    ) -> Result<Self, FleetError> {
        let registry = AgentRegistry::from_config(&config);
        let queue = Arc::new(JobQueue::new(QueuePolicy::from(&config.queue))?);
        let supervisor = Arc::new(Supervisor::new(launcher, config.supervisor.grace_period));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            sink.clone(),
            supervisor.clone(),
            DispatchPolicy::from(&config),
        ));
        let maintenance = MaintenanceScheduler::from_config(&config.maintenance, Utc::now())?;

        Ok(Self {
            config,
            config_path,
            registry,
            queue,
            sink,
            supervisor,
            dispatcher,
            monitor: HealthMonitor::new(),
            maintenance,
        })
    }
}
