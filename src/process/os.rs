use std::process::Stdio;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use crate::agents::AgentSpec;
use crate::errors::FleetError;
use super::{ExitState, ProcessHandle, ProcessLauncher};

/// Spawns agents as OS child processes.
#[derive(Debug, Default, Clone)]
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    fn launch(&self, spec: &AgentSpec, index: u32) -> Result<Arc<dyn ProcessHandle>, FleetError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .env("FLEETD_AGENT_ID", &spec.id)
            .env("FLEETD_INSTANCE", index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            FleetError::ProcessExit(format!("Failed to spawn '{}': {}", spec.command_line(), e))
        })?;
        let pid = child.id();
        info!(agent = %spec.id, index, pid = ?pid, "Spawned agent process");

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, spec.id.clone(), index, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, spec.id.clone(), index, "stderr");
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill_request = Arc::new(Notify::new());
        let kill_signal = kill_request.clone();
        let agent = spec.id.clone();

        // Reaper: owns the child until it exits
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_signal.notified() => {
                    if let Err(e) = child.start_kill() {
                        warn!(agent = %agent, index, error = %e, "Failed to kill child");
                    }
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => exit_state(status),
                Err(e) => {
                    warn!(agent = %agent, index, error = %e, "Failed to reap child");
                    ExitState::default()
                }
            };
            debug!(agent = %agent, index, %exit, "Agent process exited");
            exit_tx.send_replace(Some(exit));
        });

        Ok(Arc::new(OsProcess { pid, exit: exit_rx, kill_request }))
    }
}

fn forward_lines<R>(stream: R, agent: String, index: u32, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(agent = %agent, index, stream = stream_name, "{}", line);
        }
    });
}

fn exit_state(status: std::process::ExitStatus) -> ExitState {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        ExitState { code: status.code(), signal: status.signal() }
    }
    #[cfg(not(unix))]
    {
        ExitState { code: status.code(), signal: None }
    }
}

#[derive(Debug)]
pub struct OsProcess {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitState>>,
    kill_request: Arc<Notify>,
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_exit(&self) -> Option<ExitState> {
        *self.exit.borrow()
    }

    fn terminate(&self) -> Result<(), FleetError> {
        if self.try_exit().is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let Some(pid) = self.pid else { return Ok(()) };
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(FleetError::ProcessExit(format!("Failed to signal pid {}: {}", pid, e))),
            }
        }
        #[cfg(not(unix))]
        {
            self.kill()
        }
    }

    fn kill(&self) -> Result<(), FleetError> {
        self.kill_request.notify_one();
        Ok(())
    }

    async fn wait(&self) -> ExitState {
        let mut rx = self.exit.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or_default(),
            Err(_) => ExitState::default(),
        };
        exit
    }
}
