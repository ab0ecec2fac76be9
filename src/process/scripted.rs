//! In-memory launcher for exercising the supervisor without real children.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use crate::agents::AgentSpec;
use crate::errors::FleetError;
use super::{ExitState, ProcessHandle, ProcessLauncher};

const SIGKILL: i32 = 9;
const SIGTERM: i32 = 15;

#[derive(Debug, Default)]
struct Script {
    failing_launches: HashMap<String, u32>,
    stubborn: HashSet<String>,
    launched: Vec<Arc<ScriptedProcess>>,
    next_pid: u32,
}

/// Launcher whose processes run until they are stopped or told to exit.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    script: Mutex<Script>,
}

impl ScriptedLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` launches of `agent` fail.
    pub fn fail_next(&self, agent: &str, count: u32) {
        self.script.lock().failing_launches.insert(agent.to_string(), count);
    }

    /// Processes launched for `agent` from now on ignore termination requests.
    pub fn ignore_terminate(&self, agent: &str) {
        self.script.lock().stubborn.insert(agent.to_string());
    }

    pub fn launches(&self, agent: &str) -> usize {
        self.script.lock().launched.iter().filter(|p| p.agent_id == agent).count()
    }

    /// Most recently launched process for an instance.
    pub fn process(&self, agent: &str, index: u32) -> Option<Arc<ScriptedProcess>> {
        self.script
            .lock()
            .launched
            .iter()
            .rev()
            .find(|p| p.agent_id == agent && p.index == index)
            .cloned()
    }

    /// Processes that have not exited yet.
    pub fn alive(&self) -> usize {
        self.script.lock().launched.iter().filter(|p| p.try_exit().is_none()).count()
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&self, spec: &AgentSpec, index: u32) -> Result<Arc<dyn ProcessHandle>, FleetError> {
        let mut script = self.script.lock();
        if let Some(remaining) = script.failing_launches.get_mut(&spec.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FleetError::ProcessExit(format!(
                    "Failed to spawn '{}': scripted failure", spec.command_line()
                )));
            }
        }

        script.next_pid += 1;
        let (exit, _) = watch::channel(None);
        let process = Arc::new(ScriptedProcess {
            agent_id: spec.id.clone(),
            index,
            pid: 10_000 + script.next_pid,
            stubborn: script.stubborn.contains(&spec.id),
            terminate_requests: AtomicU32::new(0),
            exit,
        });
        script.launched.push(process.clone());
        Ok(process)
    }
}

#[derive(Debug)]
pub struct ScriptedProcess {
    pub agent_id: String,
    pub index: u32,
    pid: u32,
    stubborn: bool,
    terminate_requests: AtomicU32,
    exit: watch::Sender<Option<ExitState>>,
}

impl ScriptedProcess {
    /// Simulate the process exiting on its own.
    pub fn exit_with(&self, code: i32) {
        self.finish(ExitState::code(code));
    }

    pub fn terminate_requests(&self) -> u32 {
        self.terminate_requests.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.try_exit().is_some_and(|e| e.signal == Some(SIGKILL))
    }

    fn finish(&self, state: ExitState) {
        self.exit.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(state);
            true
        });
    }
}

#[async_trait]
impl ProcessHandle for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&self) -> Option<ExitState> {
        *self.exit.borrow()
    }

    fn terminate(&self) -> Result<(), FleetError> {
        self.terminate_requests.fetch_add(1, Ordering::SeqCst);
        if !self.stubborn {
            self.finish(ExitState::signaled(SIGTERM));
        }
        Ok(())
    }

    fn kill(&self) -> Result<(), FleetError> {
        self.finish(ExitState::signaled(SIGKILL));
        Ok(())
    }

    async fn wait(&self) -> ExitState {
        let mut rx = self.exit.subscribe();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or_default(),
            Err(_) => ExitState::default(),
        };
        exit
    }
}
