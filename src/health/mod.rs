//! Liveness probes. The monitor only reports; the supervisor decides what to do.

pub mod report;

pub use report::{HealthReport, ProbeOutcome, ProbeTarget};

use std::time::Duration;
use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, warn};
use crate::agents::ProbeSpec;

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    client: Client,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    pub async fn probe_all(&self, targets: &[ProbeTarget]) -> Vec<HealthReport> {
        join_all(targets.iter().map(|t| self.probe(t))).await
    }

    pub async fn probe(&self, target: &ProbeTarget) -> HealthReport {
        if let Some(exit) = target.handle.try_exit() {
            return HealthReport::new(
                target,
                ProbeOutcome::Exited { code: exit.code },
                Some(format!("process exited ({})", exit)),
            );
        }

        let (outcome, message) = match &target.probe {
            ProbeSpec::Process { .. } => (ProbeOutcome::Alive, None),
            ProbeSpec::Http { url, timeout } => self.probe_http(url, *timeout).await,
        };

        match outcome {
            ProbeOutcome::TimedOut => warn!(
                agent = %target.agent_id, index = target.index, tag = "probe_timeout",
                "Health probe timed out"
            ),
            ProbeOutcome::Failed => warn!(
                agent = %target.agent_id, index = target.index,
                detail = message.as_deref().unwrap_or(""), "Health probe failed"
            ),
            _ => debug!(agent = %target.agent_id, index = target.index, "Health probe ok"),
        }
        HealthReport::new(target, outcome, message)
    }

    async fn probe_http(&self, url: &str, timeout: Duration) -> (ProbeOutcome, Option<String>) {
        let request = self.client.get(url).timeout(timeout).send();
        match tokio::time::timeout(timeout, request).await {
            Err(_) => timed_out(timeout),
            Ok(Err(e)) if e.is_timeout() => timed_out(timeout),
            Ok(Err(e)) => (ProbeOutcome::Failed, Some(format!("probe request failed: {}", e))),
            Ok(Ok(resp)) if resp.status().is_success() => (ProbeOutcome::Alive, None),
            Ok(Ok(resp)) => (ProbeOutcome::Failed, Some(format!("probe returned HTTP {}", resp.status()))),
        }
    }
}

fn timed_out(timeout: Duration) -> (ProbeOutcome, Option<String>) {
    (
        ProbeOutcome::TimedOut,
        Some(format!("probe_timeout: no answer within {:?}", timeout)),
    )
}
