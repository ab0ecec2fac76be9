pub mod metrics;

use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};
use crate::config::FleetConfig;
use crate::errors::FleetError;
use crate::queue::{Job, JobQueue, LeasedJob, NewJob, QueueStats};
use crate::sink::{ResultRecord, ResultSink, ResultStatus};
use crate::supervisor::{Supervisor, SupervisorSummary};

#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub max_batch: usize,
    pub accept_late_results: bool,
    pub dead_letter_alert: usize,
}

impl From<&FleetConfig> for DispatchPolicy {
    fn from(config: &FleetConfig) -> Self {
        Self {
            max_batch: config.dispatch.max_batch,
            accept_late_results: config.dispatch.accept_late_results,
            dead_letter_alert: config.queue.dead_letter_alert,
        }
    }
}

/// Result body as posted by a worker. Fields are optional so that a
/// missing one is reported as a validation error rather than a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSubmission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub worker: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub status: &'static str,
    pub job_id: String,
    pub result_seq: i64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub agents: SupervisorSummary,
    pub queue: QueueStats,
    pub results_recorded: Option<u64>,
    pub dead_letter_alert: bool,
    pub alerts: Vec<String>,
}

/// The polling protocol: lease jobs out, take results in.
pub struct Dispatcher {
    queue: Arc<JobQueue>,
    sink: ResultSink,
    supervisor: Arc<Supervisor>,
    policy: DispatchPolicy,
    submissions: Mutex<()>,
    started_at: DateTime<Utc>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        sink: ResultSink,
        supervisor: Arc<Supervisor>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            queue,
            sink,
            supervisor,
            policy,
            submissions: Mutex::new(()),
            started_at: Utc::now(),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Lease up to `max` jobs (default 1, capped at `max_batch`). Never waits.
    pub fn pull_jobs(&self, max: Option<usize>) -> Vec<LeasedJob> {
        let count = max.unwrap_or(1).min(self.policy.max_batch);
        self.queue.lease(count)
    }

    /// Enqueue jobs, refusing ids that already have a recorded result.
    pub fn enqueue(&self, jobs: Vec<NewJob>) -> Result<Vec<Job>, FleetError> {
        for id in jobs.iter().filter_map(|j| j.id.as_deref()) {
            if self.sink.contains(id)? {
                return Err(FleetError::Duplicate(format!("job '{}' already has a result", id)));
            }
        }
        let queued = self.queue.enqueue_many(jobs)?;
        info!(count = queued.len(), "Jobs queued");
        Ok(queued)
    }

    /// Accept a worker's result: complete the job, then append the result and
    /// its manifest entry. Submissions are handled one at a time.
    pub async fn submit_result(&self, submission: ResultSubmission) -> Result<SubmissionReceipt, FleetError> {
        let job_id = submission
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FleetError::Validation("result is missing a job id".into()))?
            .to_string();
        let status: ResultStatus = submission
            .status
            .as_deref()
            .ok_or_else(|| FleetError::Validation("result is missing a status".into()))?
            .parse()?;

        let _guard = self.submissions.lock().await;

        if self.sink.contains(&job_id)? {
            return Err(FleetError::Duplicate(format!("result for job '{}' already recorded", job_id)));
        }

        let job = self
            .queue
            .complete(&job_id, self.policy.accept_late_results)
            .map_err(|e| match e {
                FleetError::NotFound(msg) => FleetError::Conflict(msg),
                other => other,
            })?;

        let record = ResultRecord {
            job_id: job_id.clone(),
            worker: submission.worker,
            url: submission.url.unwrap_or_else(|| job.url.clone()),
            status,
            payload: submission.payload,
            received_at: Utc::now(),
        };

        match self.sink.accept(&record) {
            Ok(entry) => {
                info!(job = %job_id, status = status.as_str(), worker = ?record.worker, "Result recorded");
                Ok(SubmissionReceipt {
                    status: "accepted",
                    job_id,
                    result_seq: entry.result_seq,
                    recorded_at: entry.recorded_at,
                })
            }
            Err(e) => {
                warn!(job = %job_id, error = %e, "Failed to store result");
                self.queue.revert_completion(job);
                Err(e)
            }
        }
    }

    pub async fn status(&self) -> FleetStatus {
        let now = Utc::now();
        let agents = self.supervisor.summary().await;
        let queue = self.queue.stats();
        let mut alerts = Vec::new();

        let results_recorded = match self.sink.count() {
            Ok(count) => Some(count),
            Err(e) => {
                alerts.push(format!("result store unavailable: {}", e));
                None
            }
        };

        let dead_letter_alert = queue.dead_letter > self.policy.dead_letter_alert;
        if dead_letter_alert {
            alerts.push(
                FleetError::ResourceExhaustion(format!(
                    "{} dead-lettered jobs exceed the alert threshold of {}",
                    queue.dead_letter, self.policy.dead_letter_alert
                ))
                .to_string(),
            );
        }
        for agent in &agents.failed {
            alerts.push(format!("agent '{}' has failed instances", agent));
        }

        FleetStatus {
            status: if alerts.is_empty() { "ok" } else { "degraded" },
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            agents,
            queue,
            results_recorded,
            dead_letter_alert,
            alerts,
        }
    }

    pub async fn metrics(&self) -> String {
        let snapshots = self.supervisor.snapshot().await;
        let results = self.sink.count().ok();
        metrics::render(&self.queue.stats(), &snapshots, results, self.policy.dead_letter_alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::scripted::ScriptedLauncher;
    use crate::queue::QueuePolicy;
    use serde_json::json;
    use std::time::Duration;

    fn dispatcher(accept_late: bool, max_requeues: u32) -> Dispatcher {
        let queue = JobQueue::new(QueuePolicy {
            lease_ttl: Duration::from_secs(60),
            max_requeues,
        })
        .unwrap();
        let supervisor = Supervisor::new(ScriptedLauncher::new(), Duration::from_millis(50));
        Dispatcher::new(
            Arc::new(queue),
            ResultSink::in_memory().unwrap(),
            Arc::new(supervisor),
            DispatchPolicy { max_batch: 10, accept_late_results: accept_late, dead_letter_alert: 0 },
        )
    }

    fn submission(id: &str) -> ResultSubmission {
        ResultSubmission {
            id: Some(id.into()),
            url: None,
            status: Some("success".into()),
            payload: Some(json!({"pages": 3})),
            worker: Some("w1".into()),
        }
    }

    #[tokio::test]
    async fn test_fifo_then_duplicate_leaves_state_unchanged() {
        let d = dispatcher(false, 3);
        d.enqueue(vec![
            NewJob::with_id("a", "https://a.example"),
            NewJob::with_id("b", "https://b.example"),
        ])
        .unwrap();

        assert_eq!(d.pull_jobs(Some(1))[0].job.id, "a");
        assert_eq!(d.pull_jobs(Some(1))[0].job.id, "b");

        let receipt = d.submit_result(submission("a")).await.unwrap();
        assert_eq!(receipt.status, "accepted");
        let stats = d.queue().stats();
        let count = d.sink().count().unwrap();

        let err = d.submit_result(submission("a")).await.unwrap_err();
        assert!(matches!(err, FleetError::Duplicate(_)));
        assert_eq!(d.queue().stats(), stats);
        assert_eq!(d.sink().count().unwrap(), count);
        assert_eq!(count, 1);

        let stored = d.sink().get("a").unwrap().unwrap();
        assert_eq!(stored.record.url, "https://a.example");
    }

    #[tokio::test]
    async fn test_pull_defaults_and_caps() {
        let d = dispatcher(false, 3);
        let batch = (0..30).map(|i| NewJob::with_id(format!("j{i}"), "https://x.example")).collect();
        d.enqueue(batch).unwrap();

        assert_eq!(d.pull_jobs(None).len(), 1);
        assert_eq!(d.pull_jobs(Some(0)).len(), 0);
        assert_eq!(d.pull_jobs(Some(500)).len(), 10);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_submissions() {
        let d = dispatcher(false, 3);
        let missing_id = ResultSubmission { id: None, ..submission("x") };
        assert!(matches!(d.submit_result(missing_id).await, Err(FleetError::Validation(_))));

        let bad_status = ResultSubmission { status: Some("meh".into()), ..submission("x") };
        assert!(matches!(d.submit_result(bad_status).await, Err(FleetError::Validation(_))));

        assert!(matches!(d.submit_result(submission("ghost")).await, Err(FleetError::Conflict(_))));

        d.enqueue(vec![NewJob::with_id("unleased", "https://u.example")]).unwrap();
        assert!(matches!(d.submit_result(submission("unleased")).await, Err(FleetError::Conflict(_))));
        assert_eq!(d.sink().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_late_submission_mode() {
        let now = Utc::now();
        for accept_late in [false, true] {
            let d = dispatcher(accept_late, 3);
            d.enqueue(vec![NewJob::with_id("a", "https://a.example")]).unwrap();
            d.queue().lease_at(1, now);
            d.queue().reclaim_at(now + chrono::Duration::seconds(61));

            let result = d.submit_result(submission("a")).await;
            assert_eq!(result.is_ok(), accept_late);
        }
    }

    #[tokio::test]
    async fn test_enqueue_refuses_completed_ids() {
        let d = dispatcher(false, 3);
        d.enqueue(vec![NewJob::with_id("a", "https://a.example")]).unwrap();
        d.pull_jobs(Some(1));
        d.submit_result(submission("a")).await.unwrap();

        let err = d.enqueue(vec![NewJob::with_id("a", "https://a.example")]).unwrap_err();
        assert!(matches!(err, FleetError::Duplicate(_)));
        let err = d.submit_result(submission("a")).await.unwrap_err();
        assert!(matches!(err, FleetError::Duplicate(_)));
        assert_eq!(d.queue().stats().completed_total, 1);
    }

    #[tokio::test]
    async fn test_status_flags_dead_letters() {
        let d = dispatcher(false, 0);
        let now = Utc::now();
        d.enqueue(vec![NewJob::with_id("a", "https://a.example")]).unwrap();
        d.queue().lease_at(1, now);
        d.queue().reclaim_at(now + chrono::Duration::seconds(61));

        let status = d.status().await;
        assert_eq!(status.status, "degraded");
        assert!(status.dead_letter_alert);
        assert_eq!(status.queue.dead_letter, 1);
        assert!(status.alerts[0].contains("dead-lettered"));
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_submissions_write_once() {
        let d = Arc::new(dispatcher(false, 3));
        d.enqueue(vec![NewJob::with_id("a", "https://a.example")]).unwrap();
        d.pull_jobs(Some(1));

        let attempts = (0..8).map(|_| {
            let d = d.clone();
            tokio::spawn(async move { d.submit_result(submission("a")).await.is_ok() })
        });
        let accepted = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(d.sink().count().unwrap(), 1);
    }
}
