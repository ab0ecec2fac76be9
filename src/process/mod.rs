//! Narrow process-handle capability the supervisor drives.
//!
//! `OsLauncher` spawns real children through `tokio::process`; `scripted`
//! provides an in-memory launcher whose processes exit only when told to. It
//! is test support and only compiled for tests or with `test-support`.

pub mod os;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;

pub use os::OsLauncher;

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;
use crate::agents::AgentSpec;
use crate::errors::FleetError;

/// Upper bound on waiting for a child after a force kill.
const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitState {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitState {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code), signal: None }
    }

    pub fn signaled(signal: i32) -> Self {
        Self { code: None, signal: Some(signal) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown exit"),
        }
    }
}

#[async_trait]
pub trait ProcessHandle: Send + Sync + std::fmt::Debug {
    fn pid(&self) -> Option<u32>;

    /// Exit state if the process has already exited.
    fn try_exit(&self) -> Option<ExitState>;

    /// Ask the process to exit (SIGTERM on unix).
    fn terminate(&self) -> Result<(), FleetError>;

    /// Force the process to exit.
    fn kill(&self) -> Result<(), FleetError>;

    async fn wait(&self) -> ExitState;
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &AgentSpec, index: u32) -> Result<Arc<dyn ProcessHandle>, FleetError>;
}

#[derive(Debug, Clone, Copy)]
pub struct StopOutcome {
    pub exit: ExitState,
    pub forced: bool,
}

/// Terminate, wait up to `grace`, then kill.
pub async fn stop_gracefully(handle: &dyn ProcessHandle, grace: Duration) -> StopOutcome {
    if let Some(exit) = handle.try_exit() {
        return StopOutcome { exit, forced: false };
    }

    if let Err(e) = handle.terminate() {
        warn!(pid = ?handle.pid(), error = %e, "Graceful termination request failed");
    }
    if let Ok(exit) = tokio::time::timeout(grace, handle.wait()).await {
        return StopOutcome { exit, forced: false };
    }

    warn!(pid = ?handle.pid(), grace_secs = grace.as_secs_f64(), "Process ignored termination, killing");
    if let Err(e) = handle.kill() {
        warn!(pid = ?handle.pid(), error = %e, "Force kill failed");
    }
    let exit = tokio::time::timeout(KILL_WAIT, handle.wait())
        .await
        .unwrap_or_default();
    StopOutcome { exit, forced: true }
}
