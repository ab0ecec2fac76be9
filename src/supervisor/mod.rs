//! Lifecycle owner for every agent instance.
//!
//! The instance table sits behind a single async mutex and is only mutated by
//! `Supervisor` methods. Process stops that may take a full grace period run
//! with the lock released.

pub mod instance;

pub use instance::{InstanceSnapshot, InstanceState};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use crate::agents::AgentSpec;
use crate::config::duration::deadline;
use crate::errors::FleetError;
use crate::health::{HealthReport, ProbeOutcome, ProbeTarget};
use crate::process::{stop_gracefully, ProcessHandle, ProcessLauncher, StopOutcome};
use instance::Instance;

type InstanceKey = (String, u32);

#[derive(Debug, Clone, Default, Serialize)]
pub struct StopReport {
    pub stopped: usize,
    /// `agent#index` of instances that needed a force kill.
    pub forced: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub forced: Vec<String>,
    /// Agents with at least one instance in `Failed` when shutdown began.
    pub failed_agents: Vec<String>,
}

impl ShutdownReport {
    pub fn clean(&self) -> bool {
        self.forced.is_empty() && self.failed_agents.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SupervisorSummary {
    pub agents: usize,
    pub instances: usize,
    pub states: BTreeMap<&'static str, usize>,
    pub failed: Vec<String>,
    pub restarts_total: u64,
}

pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    instances: Mutex<BTreeMap<InstanceKey, Instance>>,
    grace_period: Duration,
    reaping: parking_lot::Mutex<Vec<JoinHandle<StopOutcome>>>,
    /// Set once by `shutdown`; no process is launched afterwards.
    shutting_down: AtomicBool,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, grace_period: Duration) -> Self {
        Self {
            launcher,
            instances: Mutex::new(BTreeMap::new()),
            grace_period,
            reaping: parking_lot::Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Start instances `0..count` of `spec`. Instances that are already live are left alone.
    pub async fn start(&self, spec: Arc<AgentSpec>, count: u32) {
        if self.is_shutting_down() {
            warn!(agent = %spec.id, "Supervisor is shutting down, not starting agent");
            return;
        }
        let now = Utc::now();
        let mut table = self.instances.lock().await;
        for index in 0..count {
            let key = (spec.id.clone(), index);
            let inst = table
                .entry(key)
                .or_insert_with(|| Instance::new(spec.clone(), index));
            if inst.state == InstanceState::Stopped || inst.generation == 0 {
                inst.spec = spec.clone();
                inst.failure_count = 0;
                self.launch(inst, now);
            }
        }
        info!(agent = %spec.id, count, "Agent started");
    }

    /// Stop every instance of an agent. Already stopped instances are skipped.
    pub async fn stop(&self, agent_id: &str) -> StopReport {
        self.stop_matching(|key| key.0 == agent_id).await
    }

    /// Stop an agent and drop its instances from the table.
    pub async fn remove(&self, agent_id: &str) -> StopReport {
        let report = self.stop(agent_id).await;
        self.instances.lock().await.retain(|key, _| key.0 != agent_id);
        info!(agent = %agent_id, "Agent removed");
        report
    }

    /// Bring an agent to exactly `count` instances, adopting `spec` for all of them.
    /// Surplus instances are stopped and removed.
    pub async fn scale(&self, spec: Arc<AgentSpec>, count: u32) -> StopReport {
        if self.is_shutting_down() {
            warn!(agent = %spec.id, "Supervisor is shutting down, not scaling agent");
            return StopReport::default();
        }
        {
            let mut table = self.instances.lock().await;
            for (key, inst) in table.iter_mut() {
                if key.0 == spec.id {
                    inst.spec = spec.clone();
                }
            }
        }
        let id = spec.id.clone();
        let report = self.stop_matching(|key| key.0 == id && key.1 >= count).await;
        self.instances
            .lock()
            .await
            .retain(|key, _| !(key.0 == spec.id && key.1 >= count));
        self.start(spec, count).await;
        report
    }

    /// Operator restart: clears the failure counter and relaunches, after stopping
    /// any live process. `index = None` restarts every instance of the agent.
    pub async fn restart(&self, agent_id: &str, index: Option<u32>) -> Result<Vec<InstanceSnapshot>, FleetError> {
        if self.is_shutting_down() {
            return Err(FleetError::Conflict("supervisor is shutting down".into()));
        }
        let matches = |key: &InstanceKey| key.0 == agent_id && index.map_or(true, |i| key.1 == i);

        let (keys, handles) = {
            let mut table = self.instances.lock().await;
            let found: Vec<InstanceKey> = table.keys().filter(|k| matches(k)).cloned().collect();
            if found.is_empty() {
                return Err(FleetError::NotFound(match index {
                    Some(i) => format!("agent '{}' has no instance {}", agent_id, i),
                    None => format!("unknown agent '{}'", agent_id),
                }));
            }
            // Instances mid-stop belong to the stop in progress
            let keys: Vec<InstanceKey> = found
                .into_iter()
                .filter(|k| table.get(k).is_some_and(|inst| inst.state != InstanceState::Stopping))
                .collect();
            if keys.is_empty() {
                return Err(FleetError::Conflict(format!("agent '{}' is being stopped", agent_id)));
            }
            let mut handles = Vec::new();
            for key in &keys {
                if let Some(inst) = table.get_mut(key) {
                    inst.state = InstanceState::Restarting;
                    inst.restart_at = None;
                    inst.failure_count = 0;
                    inst.probe_failures = 0;
                    inst.running_since = None;
                    inst.last_message = Some("restart requested".into());
                    if let Some(handle) = inst.handle.take() {
                        handles.push(handle);
                    }
                }
            }
            (keys, handles)
        };

        let grace = self.grace_period;
        join_all(handles.iter().map(|h| stop_gracefully(h.as_ref(), grace))).await;

        let now = Utc::now();
        let mut table = self.instances.lock().await;
        let mut snapshots = Vec::new();
        for key in keys {
            if let Some(inst) = table.get_mut(&key) {
                // Shutdown may have claimed the instance meanwhile
                if inst.state == InstanceState::Restarting && inst.restart_at.is_none() {
                    inst.restarts += 1;
                    inst.last_restart = Some(now);
                    self.launch(inst, now);
                }
                snapshots.push(inst.snapshot(now));
            }
        }
        info!(agent = %agent_id, index = ?index, "Manual restart");
        Ok(snapshots)
    }

    /// Relaunch instances whose backoff has elapsed and clear the failure
    /// counter of instances that stayed healthy for a full interval.
    pub async fn drive(&self, now: DateTime<Utc>) -> usize {
        if self.is_shutting_down() {
            return 0;
        }
        let mut table = self.instances.lock().await;
        let mut relaunched = 0;
        for inst in table.values_mut() {
            match inst.state {
                InstanceState::Restarting if inst.restart_at.is_some_and(|at| at <= now) => {
                    inst.restarts += 1;
                    inst.last_restart = Some(now);
                    debug!(agent = %inst.spec.id, index = inst.index, attempt = inst.failure_count, "Restarting instance");
                    self.launch(inst, now);
                    relaunched += 1;
                }
                InstanceState::Running => Self::settle(inst, now),
                _ => {}
            }
        }
        relaunched
    }

    /// Instances whose next probe is due. Each is scheduled for its next interval.
    pub async fn due_probes(&self, now: DateTime<Utc>) -> Vec<ProbeTarget> {
        let mut table = self.instances.lock().await;
        let mut due = Vec::new();
        for inst in table.values_mut() {
            if !inst.state.is_probed() || inst.next_probe.map_or(true, |at| at > now) {
                continue;
            }
            let Some(handle) = inst.handle.clone() else { continue };
            inst.next_probe = Some(deadline(now, inst.spec.health_interval));
            due.push(ProbeTarget {
                agent_id: inst.spec.id.clone(),
                index: inst.index,
                generation: inst.generation,
                probe: inst.spec.probe.clone(),
                handle,
            });
        }
        due
    }

    /// Feed a probe result into the state machine.
    pub async fn apply_report(&self, report: &HealthReport, now: DateTime<Utc>) {
        let mut table = self.instances.lock().await;
        let Some(inst) = table.get_mut(&(report.agent_id.clone(), report.index)) else { return };
        if inst.generation != report.generation || !inst.state.is_probed() {
            return;
        }
        inst.last_health = Some(report.timestamp);

        match report.outcome {
            ProbeOutcome::Alive => {
                inst.probe_failures = 0;
                if inst.state != InstanceState::Running {
                    info!(agent = %inst.spec.id, index = inst.index, from = %inst.state, "Instance running");
                    inst.state = InstanceState::Running;
                    inst.running_since = Some(now);
                    inst.last_message = None;
                }
                Self::settle(inst, now);
            }
            ProbeOutcome::Exited { .. } => {
                let reason = report.message.clone().unwrap_or_else(|| "process exited".into());
                self.confirm_failure(inst, now, reason);
            }
            ProbeOutcome::Failed | ProbeOutcome::TimedOut => {
                inst.probe_failures += 1;
                inst.state = InstanceState::Unhealthy;
                inst.running_since = None;
                inst.last_message = report.message.clone();
                let threshold = inst.spec.restart.failure_threshold;
                debug!(
                    agent = %inst.spec.id, index = inst.index,
                    probe_failures = inst.probe_failures, threshold, "Probe failed"
                );
                if inst.probe_failures >= threshold {
                    let reason = format!(
                        "{} consecutive failed probes: {}",
                        inst.probe_failures,
                        report.message.as_deref().unwrap_or("no detail")
                    );
                    self.confirm_failure(inst, now, reason);
                }
            }
        }
    }

    /// The spec the supervisor is currently running for an agent.
    pub async fn spec_of(&self, agent_id: &str) -> Option<Arc<AgentSpec>> {
        self.instances
            .lock()
            .await
            .iter()
            .find(|(key, _)| key.0 == agent_id)
            .map(|(_, inst)| inst.spec.clone())
    }

    pub async fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let now = Utc::now();
        self.instances.lock().await.values().map(|inst| inst.snapshot(now)).collect()
    }

    pub async fn summary(&self) -> SupervisorSummary {
        let table = self.instances.lock().await;
        let mut summary = SupervisorSummary {
            instances: table.len(),
            states: InstanceState::ALL.iter().map(|s| (s.as_str(), 0)).collect(),
            ..Default::default()
        };
        let mut agents: Vec<&str> = Vec::new();
        for ((agent, _), inst) in table.iter() {
            if agents.last() != Some(&agent.as_str()) {
                agents.push(agent.as_str());
            }
            *summary.states.entry(inst.state.as_str()).or_default() += 1;
            summary.restarts_total += inst.restarts;
            if inst.state == InstanceState::Failed && !summary.failed.contains(agent) {
                summary.failed.push(agent.clone());
            }
        }
        summary.agents = agents.len();
        summary
    }

    /// Stop every instance concurrently, waiting at most the grace period
    /// before force killing. Also waits for stops started by earlier restarts.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::SeqCst);
        let failed_agents = self.summary().await.failed;
        let report = self.stop_matching(|_| true).await;

        let pending: Vec<_> = std::mem::take(&mut *self.reaping.lock());
        let mut forced = report.forced;
        for outcome in join_all(pending).await.into_iter().flatten() {
            if outcome.forced {
                forced.push("reaped process".into());
            }
        }

        if !failed_agents.is_empty() {
            error!(agents = ?failed_agents, "Shutting down with failed agents");
        }
        ShutdownReport { stopped: report.stopped, forced, failed_agents }
    }

    fn launch(&self, inst: &mut Instance, now: DateTime<Utc>) {
        if self.is_shutting_down() {
            inst.state = InstanceState::Stopped;
            inst.restart_at = None;
            return;
        }
        inst.generation += 1;
        inst.probe_failures = 0;
        inst.restart_at = None;
        inst.running_since = None;
        if let Some(previous) = inst.handle.take() {
            self.reap(previous);
        }
        match self.launcher.launch(&inst.spec, inst.index) {
            Ok(handle) => {
                inst.handle = Some(handle);
                inst.state = InstanceState::Starting;
                inst.next_probe = Some(now);
            }
            Err(e) => {
                inst.handle = None;
                self.confirm_failure(inst, now, e.to_string());
            }
        }
    }

    /// Record a confirmed failure: schedule a backoff restart, or give up once
    /// the retry budget is spent.
    fn confirm_failure(&self, inst: &mut Instance, now: DateTime<Utc>, reason: String) {
        inst.failure_count += 1;
        inst.probe_failures = 0;
        inst.running_since = None;
        inst.next_probe = None;
        if let Some(handle) = inst.handle.take() {
            self.reap(handle);
        }

        let policy = inst.spec.restart;
        if inst.failure_count > policy.max_retries {
            inst.state = InstanceState::Failed;
            inst.restart_at = None;
            error!(
                agent = %inst.spec.id, index = inst.index, failures = inst.failure_count,
                reason = %reason, "Instance failed permanently, manual restart required"
            );
        } else {
            let delay = policy.backoff(inst.failure_count);
            inst.state = InstanceState::Restarting;
            inst.restart_at = Some(deadline(now, delay));
            warn!(
                agent = %inst.spec.id, index = inst.index, failures = inst.failure_count,
                backoff_secs = delay.as_secs_f64(), reason = %reason, "Instance failed, restart scheduled"
            );
        }
        inst.last_message = Some(reason);
    }

    fn settle(inst: &mut Instance, now: DateTime<Utc>) {
        let Some(since) = inst.running_since else { return };
        let interval = chrono::Duration::from_std(inst.spec.health_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        if inst.failure_count > 0 && now - since >= interval {
            debug!(agent = %inst.spec.id, index = inst.index, "Instance stable, failure count cleared");
            inst.failure_count = 0;
        }
    }

    fn reap(&self, handle: Arc<dyn ProcessHandle>) {
        let grace = self.grace_period;
        let task = tokio::spawn(async move { stop_gracefully(handle.as_ref(), grace).await });
        let mut reaping = self.reaping.lock();
        reaping.retain(|t| !t.is_finished());
        reaping.push(task);
    }

    async fn stop_matching<F>(&self, selector: F) -> StopReport
    where
        F: Fn(&InstanceKey) -> bool,
    {
        let targets: Vec<(InstanceKey, Option<Arc<dyn ProcessHandle>>)> = {
            let mut table = self.instances.lock().await;
            table
                .iter_mut()
                .filter(|(key, inst)| selector(key) && inst.state != InstanceState::Stopped)
                .map(|(key, inst)| {
                    inst.state = InstanceState::Stopping;
                    inst.restart_at = None;
                    inst.next_probe = None;
                    (key.clone(), inst.handle.take())
                })
                .collect()
        };
        if targets.is_empty() {
            return StopReport::default();
        }

        let grace = self.grace_period;
        let outcomes = join_all(targets.iter().map(|(_, handle)| async move {
            match handle {
                Some(h) => Some(stop_gracefully(h.as_ref(), grace).await),
                None => None,
            }
        }))
        .await;

        let mut report = StopReport::default();
        let mut table = self.instances.lock().await;
        for ((key, _), outcome) in targets.iter().zip(outcomes) {
            if let Some(inst) = table.get_mut(key) {
                inst.state = InstanceState::Stopped;
                inst.running_since = None;
            }
            report.stopped += 1;
            if let Some(outcome) = outcome {
                info!(agent = %key.0, index = key.1, exit = %outcome.exit, forced = outcome.forced, "Instance stopped");
                if outcome.forced {
                    report.forced.push(format!("{}#{}", key.0, key.1));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ProbeSpec, RestartPolicy};
    use crate::process::scripted::ScriptedLauncher;
    use std::collections::BTreeMap as Map;

    fn spec(id: &str, max_retries: u32, threshold: u32) -> Arc<AgentSpec> {
        Arc::new(AgentSpec {
            id: id.to_string(),
            program: "crawler".into(),
            args: vec![],
            working_dir: None,
            instances: 1,
            restart: RestartPolicy {
                max_retries,
                backoff_base: Duration::from_secs(1),
                backoff_cap: Duration::from_secs(60),
                failure_threshold: threshold,
            },
            health_interval: Duration::from_secs(1),
            probe: ProbeSpec::Process { timeout: Duration::from_millis(100) },
            env: Map::new(),
        })
    }

    fn supervisor(launcher: &Arc<ScriptedLauncher>) -> Supervisor {
        Supervisor::new(launcher.clone(), Duration::from_millis(100))
    }

    async fn probe_all(sup: &Supervisor, now: DateTime<Utc>, outcome: ProbeOutcome) -> usize {
        let due = sup.due_probes(now).await;
        for target in &due {
            let report = HealthReport::new(target, outcome, Some(format!("{:?}", outcome)));
            sup.apply_report(&report, now).await;
        }
        due.len()
    }

    async fn state_of(sup: &Supervisor, agent: &str, index: u32) -> InstanceSnapshot {
        sup.snapshot()
            .await
            .into_iter()
            .find(|s| s.agent_id == agent && s.index == index)
            .unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[tokio::test]
    async fn test_first_successful_probe_marks_running() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("crawler", 5, 3), 2).await;

        let snap = sup.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|s| s.state == InstanceState::Starting));

        assert_eq!(probe_all(&sup, Utc::now(), ProbeOutcome::Alive).await, 2);
        assert_eq!(state_of(&sup, "crawler", 1).await.state, InstanceState::Running);
    }

    #[tokio::test]
    async fn test_glitch_below_threshold_is_absorbed() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 3), 1).await;
        let t = Utc::now();

        probe_all(&sup, t, ProbeOutcome::Alive).await;
        probe_all(&sup, t + secs(1), ProbeOutcome::Failed).await;
        probe_all(&sup, t + secs(2), ProbeOutcome::TimedOut).await;
        assert_eq!(state_of(&sup, "a", 0).await.state, InstanceState::Unhealthy);

        probe_all(&sup, t + secs(3), ProbeOutcome::Alive).await;
        let snap = state_of(&sup, "a", 0).await;
        assert_eq!(snap.state, InstanceState::Running);
        assert_eq!(snap.probe_failures, 0);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(launcher.launches("a"), 1);
    }

    #[tokio::test]
    async fn test_consecutive_failures_restart_with_capped_backoff() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 20, 3), 1).await;

        let mut now = Utc::now();
        let mut delays = Vec::new();
        for _ in 0..9 {
            for _ in 0..3 {
                assert_eq!(probe_all(&sup, now, ProbeOutcome::Failed).await, 1);
                now += secs(1);
            }
            let snap = state_of(&sup, "a", 0).await;
            assert_eq!(snap.state, InstanceState::Restarting);
            let restart_at = snap.restart_at.unwrap();
            delays.push((restart_at - (now - secs(1))).num_seconds());

            // Nothing happens before the backoff elapses
            assert_eq!(sup.drive(restart_at - chrono::Duration::milliseconds(1)).await, 0);
            assert_eq!(sup.drive(restart_at).await, 1);
            assert_eq!(state_of(&sup, "a", 0).await.state, InstanceState::Starting);
            now = restart_at;
        }

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
        assert_eq!(launcher.launches("a"), 10);
        assert_eq!(state_of(&sup, "a", 0).await.restarts, 9);
    }

    #[tokio::test]
    async fn test_old_process_is_stopped_on_restart() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 1), 1).await;
        let first = launcher.process("a", 0).unwrap();

        probe_all(&sup, Utc::now(), ProbeOutcome::Failed).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(first.try_exit().is_some());
        assert_eq!(first.terminate_requests(), 1);
    }

    #[tokio::test]
    async fn test_process_exit_confirms_failure_immediately() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 3), 1).await;
        launcher.process("a", 0).unwrap().exit_with(1);

        probe_all(&sup, Utc::now(), ProbeOutcome::Exited { code: Some(1) }).await;
        let snap = state_of(&sup, "a", 0).await;
        assert_eq!(snap.state, InstanceState::Restarting);
        assert_eq!(snap.failure_count, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_then_manual_restart() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 1), 1).await;

        let mut now = Utc::now();
        for _ in 0..6 {
            probe_all(&sup, now, ProbeOutcome::Failed).await;
            if let Some(at) = state_of(&sup, "a", 0).await.restart_at {
                now = at;
                sup.drive(now).await;
            }
        }

        let snap = state_of(&sup, "a", 0).await;
        assert_eq!(snap.state, InstanceState::Failed);
        assert_eq!(snap.failure_count, 6);
        assert_eq!(sup.summary().await.failed, vec!["a".to_string()]);

        // No automatic restart, however long we wait
        assert_eq!(sup.drive(now + secs(3600)).await, 0);
        assert!(sup.due_probes(now + secs(3600)).await.is_empty());
        let launches = launcher.launches("a");

        let snaps = sup.restart("a", None).await.unwrap();
        assert_eq!(snaps[0].state, InstanceState::Starting);
        assert_eq!(snaps[0].failure_count, 0);
        assert_eq!(launcher.launches("a"), launches + 1);
    }

    #[tokio::test]
    async fn test_restart_unknown_agent_is_not_found() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 1), 1).await;
        assert!(matches!(sup.restart("ghost", None).await, Err(FleetError::NotFound(_))));
        assert!(matches!(sup.restart("a", Some(7)).await, Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failure_count_resets_after_stable_interval() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 1), 1).await;

        let t = Utc::now();
        probe_all(&sup, t, ProbeOutcome::Failed).await;
        let at = state_of(&sup, "a", 0).await.restart_at.unwrap();
        sup.drive(at).await;
        probe_all(&sup, at, ProbeOutcome::Alive).await;
        assert_eq!(state_of(&sup, "a", 0).await.failure_count, 1);

        sup.drive(at + chrono::Duration::milliseconds(500)).await;
        assert_eq!(state_of(&sup, "a", 0).await.failure_count, 1);
        sup.drive(at + secs(1)).await;
        assert_eq!(state_of(&sup, "a", 0).await.failure_count, 0);
    }

    #[tokio::test]
    async fn test_launch_failure_schedules_restart() {
        let launcher = ScriptedLauncher::new();
        launcher.fail_next("a", 1);
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 3), 1).await;

        let snap = state_of(&sup, "a", 0).await;
        assert_eq!(snap.state, InstanceState::Restarting);
        assert_eq!(snap.failure_count, 1);
        assert!(snap.last_message.unwrap().contains("scripted failure"));

        sup.drive(snap.restart_at.unwrap()).await;
        assert_eq!(state_of(&sup, "a", 0).await.state, InstanceState::Starting);
    }

    #[tokio::test]
    async fn test_stale_report_is_ignored() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 1), 1).await;
        let stale = sup.due_probes(Utc::now()).await.remove(0);

        sup.restart("a", Some(0)).await.unwrap();
        let report = HealthReport::new(&stale, ProbeOutcome::Failed, None);
        sup.apply_report(&report, Utc::now()).await;
        assert_eq!(state_of(&sup, "a", 0).await.state, InstanceState::Starting);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 3), 2).await;

        let first = sup.stop("a").await;
        assert_eq!(first.stopped, 2);
        assert!(first.forced.is_empty());
        assert_eq!(launcher.alive(), 0);

        let second = sup.stop("a").await;
        assert_eq!(second.stopped, 0);
        assert!(sup.snapshot().await.iter().all(|s| s.state == InstanceState::Stopped));
    }

    #[tokio::test]
    async fn test_scale_down_removes_surplus() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 3), 4).await;

        sup.scale(spec("a", 5, 3), 2).await;
        let snap = sup.snapshot().await;
        assert_eq!(snap.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(launcher.alive(), 2);

        sup.scale(spec("a", 5, 3), 3).await;
        assert_eq!(sup.snapshot().await.len(), 3);
        assert_eq!(launcher.launches("a"), 5);
    }

    #[tokio::test]
    async fn test_shutdown_forces_stubborn_within_grace() {
        let launcher = ScriptedLauncher::new();
        launcher.ignore_terminate("stubborn");
        let sup = supervisor(&launcher);
        sup.start(spec("polite", 5, 3), 3).await;
        sup.start(spec("stubborn", 5, 3), 1).await;

        let started = std::time::Instant::now();
        let report = sup.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(100) + Duration::from_secs(1));

        assert_eq!(report.stopped, 4);
        assert_eq!(report.forced, vec!["stubborn#0".to_string()]);
        assert!(!report.clean());
        assert!(launcher.process("stubborn", 0).unwrap().was_killed());
        assert!(sup.snapshot().await.iter().all(|s| s.state == InstanceState::Stopped));
    }

    #[tokio::test]
    async fn test_huge_intervals_saturate_schedules() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        let forever = Duration::from_secs(300_000 * 365 * 24 * 3600);
        let mut slow = (*spec("slow", 5, 1)).clone();
        slow.health_interval = forever;
        slow.restart.backoff_base = forever;
        slow.restart.backoff_cap = forever;
        let mut broken = slow.clone();
        broken.id = "broken".into();

        launcher.fail_next("broken", 1);
        sup.start(Arc::new(slow), 1).await;
        sup.start(Arc::new(broken), 1).await;
        let restarting = state_of(&sup, "broken", 0).await;
        assert_eq!(restarting.state, InstanceState::Restarting);

        let now = Utc::now();
        assert_eq!(probe_all(&sup, now, ProbeOutcome::Alive).await, 1);
        assert_eq!(probe_all(&sup, now + secs(3600), ProbeOutcome::Alive).await, 0);
        assert_eq!(sup.drive(now + secs(3600)).await, 0);
    }

    #[tokio::test]
    async fn test_nothing_launches_after_shutdown() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 1), 2).await;
        assert!(sup.shutdown().await.clean());
        assert_eq!(launcher.alive(), 0);

        let err = sup.restart("a", None).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict(_)));
        sup.scale(spec("a", 5, 1), 3).await;
        sup.start(spec("b", 5, 1), 1).await;
        assert_eq!(sup.drive(Utc::now() + secs(120)).await, 0);

        assert_eq!(launcher.alive(), 0);
        assert_eq!(launcher.launches("a"), 2);
        assert_eq!(launcher.launches("b"), 0);
        assert!(sup.snapshot().await.iter().all(|s| s.state == InstanceState::Stopped));
    }

    #[tokio::test]
    async fn test_restart_racing_shutdown_does_not_relaunch() {
        let launcher = ScriptedLauncher::new();
        launcher.ignore_terminate("a");
        let sup = Arc::new(supervisor(&launcher));
        sup.start(spec("a", 5, 1), 1).await;

        // The restart sits out the grace period on a process that ignores TERM
        let restarting = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.restart("a", None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sup.shutdown().await;
        let _ = restarting.await.unwrap();

        assert_eq!(launcher.launches("a"), 1);
        assert_eq!(launcher.alive(), 0);
        assert_eq!(state_of(&sup, "a", 0).await.state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_reports_failed_agents() {
        let launcher = ScriptedLauncher::new();
        launcher.fail_next("doomed", 10);
        let sup = supervisor(&launcher);
        sup.start(spec("doomed", 0, 1), 1).await;
        sup.start(spec("fine", 5, 1), 1).await;

        let report = sup.shutdown().await;
        assert_eq!(report.failed_agents, vec!["doomed".to_string()]);
        assert!(report.forced.is_empty());
        assert!(!report.clean());
    }

    #[tokio::test]
    async fn test_summary_counts_states() {
        let launcher = ScriptedLauncher::new();
        let sup = supervisor(&launcher);
        sup.start(spec("a", 5, 3), 2).await;
        sup.start(spec("b", 5, 3), 1).await;

        let summary = sup.summary().await;
        assert_eq!(summary.agents, 2);
        assert_eq!(summary.instances, 3);
        assert_eq!(summary.states["starting"], 3);
        assert_eq!(summary.states["failed"], 0);
    }
}
