//! Periodic housekeeping tasks run from the control loop.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, info, warn};
use crate::config::{MaintenanceActionConfig, MaintenanceConfig};
use crate::errors::FleetError;
use crate::process::ExitState;

#[derive(Debug, Clone, PartialEq)]
pub enum MaintenanceAction {
    Command {
        program: String,
        args: Vec<String>,
        working_dir: Option<PathBuf>,
        timeout: Duration,
    },
    ReloadAgents,
}

#[derive(Debug)]
struct ScheduledTask {
    name: String,
    every: chrono::Duration,
    action: MaintenanceAction,
    next_run: DateTime<Utc>,
    running: Arc<AtomicBool>,
}

/// A task whose time has come. The task counts as running until this is dropped.
#[derive(Debug)]
pub struct DueTask {
    pub name: String,
    pub action: MaintenanceAction,
    running: Arc<AtomicBool>,
}

impl Drop for DueTask {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MaintenanceScheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl MaintenanceScheduler {
    pub fn from_config(tasks: &[MaintenanceConfig], now: DateTime<Utc>) -> Result<Self, FleetError> {
        let mut scheduled = Vec::with_capacity(tasks.len());
        for task in tasks {
            let every = chrono::Duration::from_std(task.every)
                .map_err(|e| FleetError::Config(format!("maintenance '{}': {}", task.name, e)))?;
            let action = match &task.action {
                MaintenanceActionConfig::Command { command, working_dir, timeout } => {
                    let mut parts = command.iter().cloned();
                    MaintenanceAction::Command {
                        program: parts.next().unwrap_or_default(),
                        args: parts.collect(),
                        working_dir: working_dir.clone(),
                        timeout: timeout.unwrap_or(task.every),
                    }
                }
                MaintenanceActionConfig::ReloadAgents => MaintenanceAction::ReloadAgents,
            };
            scheduled.push(ScheduledTask {
                name: task.name.clone(),
                every,
                action,
                next_run: now.checked_add_signed(every).unwrap_or(DateTime::<Utc>::MAX_UTC),
                running: Arc::new(AtomicBool::new(false)),
            });
        }
        Ok(Self { tasks: Mutex::new(scheduled) })
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Tasks due at `now`. A task still running from its previous slot is skipped.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<DueTask> {
        let mut tasks = self.tasks.lock();
        let mut due = Vec::new();
        for task in tasks.iter_mut().filter(|t| t.next_run <= now) {
            task.next_run = now.checked_add_signed(task.every).unwrap_or(DateTime::<Utc>::MAX_UTC);
            if task.running.swap(true, Ordering::SeqCst) {
                warn!(task = %task.name, "Maintenance task still running, skipping this slot");
                continue;
            }
            due.push(DueTask {
                name: task.name.clone(),
                action: task.action.clone(),
                running: task.running.clone(),
            });
        }
        due
    }
}

/// Run a command task to completion, killing it if it outlives `timeout`.
pub async fn run_command(
    name: &str,
    program: &str,
    args: &[String],
    working_dir: Option<&PathBuf>,
    timeout: Duration,
) -> Result<ExitState, FleetError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    info!(task = %name, program, "Running maintenance task");
    let started = std::time::Instant::now();
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| FleetError::Timeout(format!("maintenance task '{}' exceeded {:?}", name, timeout)))?
        .map_err(|e| FleetError::ProcessExit(format!("maintenance task '{}' failed to start: {}", name, e)))?;

    let exit = ExitState {
        code: output.status.code(),
        signal: None,
    };
    let stderr = String::from_utf8_lossy(&output.stderr);
    if exit.success() {
        debug!(task = %name, elapsed_ms = started.elapsed().as_millis() as u64, "Maintenance task finished");
    } else {
        warn!(task = %name, %exit, stderr = %stderr.trim(), "Maintenance task exited with failure");
    }
    Ok(exit)
}
