//! The control loop: starts the fleet, runs probes, reclaims leases, runs
//! maintenance and handles shutdown and reload signals.

pub mod context;
pub mod signals;

pub use context::FleetContext;

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use crate::agents::{specs_from_config, AgentSpec, RegistryDiff};
use crate::api::{self, AppState};
use crate::config::parse_config;
use crate::errors::FleetError;
use crate::maintenance::{run_command, DueTask, MaintenanceAction};
use crate::supervisor::ShutdownReport;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub relaunched: usize,
    pub probed: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    pub maintenance: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<FleetContext>,
    cancel: CancellationToken,
    maintenance: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self {
            ctx,
            cancel: CancellationToken::new(),
            maintenance: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub fn context(&self) -> &Arc<FleetContext> {
        &self.ctx
    }

    /// Token that stops `run` when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.ctx.dispatcher.clone(), self.ctx.config.server.api_token.clone())
    }

    /// Start the desired instance count of every registered agent.
    pub async fn start_fleet(&self) {
        let snapshot = self.ctx.registry.snapshot();
        for spec in snapshot.iter() {
            self.ctx.supervisor.start(spec.clone(), spec.instances).await;
        }
        info!(agents = snapshot.len(), "Fleet started");
    }

    /// One pass of the control loop.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let ctx = &self.ctx;
        let mut report = TickReport {
            relaunched: ctx.supervisor.drive(now).await,
            ..Default::default()
        };

        let targets = ctx.supervisor.due_probes(now).await;
        report.probed = targets.len();
        if !targets.is_empty() {
            for health in ctx.monitor.probe_all(&targets).await {
                ctx.supervisor.apply_report(&health, now).await;
            }
        }

        let reclaimed = ctx.queue.reclaim_at(now);
        report.requeued = reclaimed.requeued.len();
        report.dead_lettered = reclaimed.dead_lettered.len();
        if !reclaimed.requeued.is_empty() {
            info!(count = reclaimed.requeued.len(), "Expired leases returned to queue");
        }
        for letter in &reclaimed.dead_lettered {
            error!(job = %letter.job.id, url = %letter.job.url, reason = %letter.reason, "Job dead-lettered, manual handling required");
        }

        for task in ctx.maintenance.due(now) {
            report.maintenance.push(task.name.clone());
            self.spawn_maintenance(task);
        }
        report
    }

    fn spawn_maintenance(&self, task: DueTask) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = match &task.action {
                MaintenanceAction::Command { program, args, working_dir, timeout } => {
                    run_command(&task.name, program, args, working_dir.as_ref(), *timeout)
                        .await
                        .map(|_| ())
                }
                MaintenanceAction::ReloadAgents => this.reload_agents().await.map(|_| ()),
            };
            if let Err(e) = result {
                warn!(task = %task.name, error = %e, "Maintenance task failed");
            }
            // `task` drops here and frees its slot
        });
        let mut running = self.maintenance.lock();
        running.retain(|h| !h.is_finished());
        running.push(handle);
    }

    /// Abort maintenance runs still in flight and wait for them to unwind.
    pub async fn stop_maintenance(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = self.maintenance.lock().drain(..).collect();
        let mut aborted = 0;
        for handle in handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
            let _ = handle.await;
        }
        if aborted > 0 {
            info!(aborted, "Maintenance tasks cancelled");
        }
        aborted
    }

    /// Re-read the agent list from the config file and apply the difference.
    pub async fn reload_agents(&self) -> Result<ReloadSummary, FleetError> {
        let path = self
            .ctx
            .config_path
            .as_deref()
            .ok_or_else(|| FleetError::Config("no config file to reload from".into()))?;
        let config = parse_config(path).await?;
        let diff = self.ctx.registry.swap(specs_from_config(&config));
        if diff.is_empty() {
            info!("Agent reload: no changes");
            return Ok(ReloadSummary::default());
        }
        Ok(self.apply_diff(diff).await)
    }

    async fn apply_diff(&self, diff: RegistryDiff) -> ReloadSummary {
        let supervisor = &self.ctx.supervisor;
        let mut summary = ReloadSummary::default();

        for id in diff.removed {
            supervisor.remove(&id).await;
            summary.removed.push(id);
        }
        for spec in diff.added {
            supervisor.start(spec.clone(), spec.instances).await;
            summary.added.push(spec.id.clone());
        }
        for spec in diff.changed {
            let previous = supervisor.spec_of(&spec.id).await;
            if launch_changed(previous.as_deref(), &spec) {
                supervisor.remove(&spec.id).await;
                supervisor.start(spec.clone(), spec.instances).await;
            } else {
                supervisor.scale(spec.clone(), spec.instances).await;
            }
            summary.changed.push(spec.id.clone());
        }
        info!(added = ?summary.added, removed = ?summary.removed, changed = ?summary.changed, "Agents reloaded");
        summary
    }

    /// Serve the HTTP API on `listener` and run the control loop until a
    /// shutdown signal or cancellation, then stop the fleet.
    pub async fn run(&self, listener: TcpListener) -> Result<ShutdownReport, FleetError> {
        let addr = listener.local_addr()?;
        let router = api::build_router(self.app_state());
        let server_cancel = self.cancel.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
        });
        info!(%addr, "Dispatch server listening");

        let (reload_tx, mut reload_rx) = mpsc::channel(4);
        signals::spawn_listener(self.cancel.clone(), reload_tx)?;

        self.start_fleet().await;

        let mut ticker = tokio::time::interval(self.ctx.config.supervisor.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
                Some(()) = reload_rx.recv() => {
                    if let Err(e) = self.reload_agents().await {
                        error!(error = %e, "Agent reload failed, keeping current agents");
                    }
                }
            }
        }

        info!(grace_secs = self.ctx.supervisor.grace_period().as_secs_f64(), "Shutting down fleet");
        self.cancel.cancel();
        self.stop_maintenance().await;
        let report = self.ctx.supervisor.shutdown().await;

        match tokio::time::timeout(Duration::from_secs(5), server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "Dispatch server stopped with error"),
            Ok(Err(e)) => warn!(error = %e, "Dispatch server task failed"),
            Err(_) => warn!("Dispatch server did not stop in time"),
        }

        if report.clean() {
            info!(stopped = report.stopped, "Fleet stopped cleanly");
        } else {
            warn!(stopped = report.stopped, forced = ?report.forced, failed = ?report.failed_agents, "Fleet stopped uncleanly");
        }
        Ok(report)
    }
}

/// Whether a spec change needs fresh processes rather than a rescale.
fn launch_changed(previous: Option<&AgentSpec>, next: &AgentSpec) -> bool {
    match previous {
        Some(prev) => {
            prev.program != next.program
                || prev.args != next.args
                || prev.working_dir != next.working_dir
                || prev.env != next.env
        }
        None => true,
    }
}
