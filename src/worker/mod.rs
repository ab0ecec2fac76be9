//! Polling worker: leases jobs from the dispatch API, runs a handler command
//! per job and posts the outcome back.

pub mod client;

pub use client::DispatchClient;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::dispatch::ResultSubmission;
use crate::errors::{with_retry, FleetError, RetryConfig};
use crate::queue::LeasedJob;
use crate::sink::ResultStatus;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub concurrency: usize,
    /// Upper bound on one handler run.
    pub job_timeout: Duration,
    /// Handler program followed by its arguments.
    pub handler: Vec<String>,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub succeeded: u64,
    pub failed: u64,
    /// Results the server refused (duplicate or lease lost).
    pub rejected: u64,
    /// Results that could not be delivered at all.
    pub undelivered: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Failed,
    Rejected,
    Undelivered,
}

impl WorkerStats {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Succeeded => self.succeeded += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Rejected => self.rejected += 1,
            JobOutcome::Undelivered => self.undelivered += 1,
        }
    }
}

/// Poll until `cancel` fires, then wait for in-flight jobs and return totals.
pub async fn run_worker(
    client: DispatchClient,
    config: WorkerConfig,
    cancel: CancellationToken,
) -> Result<WorkerStats, FleetError> {
    if config.handler.is_empty() {
        return Err(FleetError::Config("worker handler command is empty".into()));
    }
    if config.concurrency == 0 {
        return Err(FleetError::Config("worker concurrency must be at least 1".into()));
    }

    let config = Arc::new(config);
    let slots = Arc::new(Semaphore::new(config.concurrency));
    let mut tasks: JoinSet<JobOutcome> = JoinSet::new();
    let mut stats = WorkerStats::default();
    info!(
        worker = %config.worker_id, orchestrator = %client.base_url(),
        concurrency = config.concurrency, "Worker started"
    );

    while !cancel.is_cancelled() {
        while let Some(done) = tasks.try_join_next() {
            record_join(&mut stats, done);
        }

        let free = slots.available_permits();
        let jobs = if free == 0 {
            Vec::new()
        } else {
            let pulled = with_retry("pull_jobs", &config.retry, || client.pull(free)).await;
            match pulled {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(error = %e, "Polling failed");
                    Vec::new()
                }
            }
        };

        if jobs.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.poll_interval) => continue,
            }
        }

        for job in jobs {
            let permit = match slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                // The server never hands out more than we asked for
                Err(_) => break,
            };
            let client = client.clone();
            let config = config.clone();
            tasks.spawn(async move {
                let outcome = process_job(&client, &config, job).await;
                drop(permit);
                outcome
            });
        }
    }

    if !tasks.is_empty() {
        info!(in_flight = tasks.len(), "Waiting for in-flight jobs");
    }
    while let Some(done) = tasks.join_next().await {
        record_join(&mut stats, done);
    }
    info!(worker = %config.worker_id, ?stats, "Worker stopped");
    Ok(stats)
}

fn record_join(stats: &mut WorkerStats, done: Result<JobOutcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) => stats.record(outcome),
        Err(e) => {
            warn!(error = %e, "Job task panicked");
            stats.record(JobOutcome::Undelivered);
        }
    }
}

async fn process_job(client: &DispatchClient, config: &WorkerConfig, job: LeasedJob) -> JobOutcome {
    let job_id = job.job.id.clone();
    debug!(job = %job_id, url = %job.job.url, "Running handler");

    let (status, payload) = match run_handler(config, &job).await {
        Ok(result) => result,
        Err(e) => (ResultStatus::Failure, json!({ "error": e.to_string() })),
    };
    let submission = ResultSubmission {
        id: Some(job_id.clone()),
        url: Some(job.job.url.clone()),
        status: Some(status.as_str().to_string()),
        payload: Some(payload),
        worker: Some(config.worker_id.clone()),
    };

    match with_retry("submit_result", &config.retry, || client.submit(&submission)).await {
        Ok(_) if status == ResultStatus::Success => JobOutcome::Succeeded,
        Ok(_) => JobOutcome::Failed,
        Err(e @ (FleetError::Duplicate(_) | FleetError::Conflict(_))) => {
            warn!(job = %job_id, error = %e, "Result rejected");
            JobOutcome::Rejected
        }
        Err(e) => {
            warn!(job = %job_id, error = %e, "Result could not be delivered, lease will expire");
            JobOutcome::Undelivered
        }
    }
}

/// Run the handler with the job JSON on stdin. Stdout becomes the payload,
/// parsed as JSON when possible.
async fn run_handler(config: &WorkerConfig, job: &LeasedJob) -> Result<(ResultStatus, Value), FleetError> {
    let input = serde_json::to_vec(job)?;
    let mut cmd = Command::new(&config.handler[0]);
    cmd.args(&config.handler[1..])
        .env("FLEETD_JOB_ID", &job.job.id)
        .env("FLEETD_JOB_URL", &job.job.url)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| FleetError::ProcessExit(format!("failed to start handler '{}': {}", config.handler[0], e)))?;

    // Input is fed while output is drained, all under the job timeout
    let stdin = child.stdin.take();
    let feed = async move {
        let Some(mut stdin) = stdin else { return };
        // A handler may exit without reading its input
        if let Err(e) = stdin.write_all(&input).await {
            debug!(job = %job.job.id, error = %e, "Handler closed stdin early");
        }
    };
    let run = async move {
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        output
    };
    let output = tokio::time::timeout(config.job_timeout, run)
        .await
        .map_err(|_| FleetError::Timeout(format!("handler exceeded {:?}", config.job_timeout)))??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let trimmed = stdout.trim();
    let body = serde_json::from_str::<Value>(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()));

    if output.status.success() {
        Ok((ResultStatus::Success, body))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(job = %job.job.id, code = ?output.status.code(), "Handler failed");
        Ok((
            ResultStatus::Failure,
            json!({
                "exit_code": output.status.code(),
                "stdout": body,
                "stderr": stderr.trim(),
            }),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::api::{build_router, AppState};
    use crate::config::parse_config_str;
    use crate::orchestrator::FleetContext;
    use crate::process::scripted::ScriptedLauncher;
    use crate::queue::NewJob;
    use crate::sink::ResultSink;

    async fn serve() -> (Arc<FleetContext>, DispatchClient) {
        let config = parse_config_str("queue:\n  lease_ttl: 30s\n").unwrap();
        let ctx = Arc::new(
            FleetContext::new(config, None, ScriptedLauncher::new(), ResultSink::in_memory().unwrap()).unwrap(),
        );
        let router = build_router(AppState::new(ctx.dispatcher.clone(), None));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        let client = DispatchClient::new(&format!("http://{}", addr), None, Duration::from_secs(5)).unwrap();
        (ctx, client)
    }

    fn worker_config(script: &str) -> WorkerConfig {
        WorkerConfig {
            worker_id: "test-worker".into(),
            poll_interval: Duration::from_millis(20),
            concurrency: 2,
            job_timeout: Duration::from_secs(5),
            handler: vec!["/bin/sh".into(), "-c".into(), script.into()],
            retry: RetryConfig {
                max_retries: 1,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                jitter: false,
            },
        }
    }

    async fn drain(ctx: &FleetContext, expected: usize) {
        for _ in 0..200 {
            if ctx.sink.count().unwrap() as usize >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("results never arrived");
    }

    #[tokio::test]
    async fn test_worker_processes_queue() {
        let (ctx, client) = serve().await;
        ctx.queue
            .enqueue_many(vec![
                NewJob::with_id("a", "https://a.example"),
                NewJob::with_id("b", "https://b.example"),
                NewJob::with_id("c", "https://c.example"),
            ])
            .unwrap();

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            client,
            worker_config(r#"cat > /dev/null; echo "{\"url\": \"$FLEETD_JOB_URL\"}""#),
            cancel.clone(),
        ));
        drain(&ctx, 3).await;
        cancel.cancel();
        let stats = worker.await.unwrap().unwrap();

        assert_eq!(stats.succeeded, 3);
        let stored = ctx.sink.get("b").unwrap().unwrap();
        assert_eq!(stored.record.worker.as_deref(), Some("test-worker"));
        assert_eq!(stored.record.payload, Some(json!({ "url": "https://b.example" })));
        assert_eq!(ctx.queue.stats().depth(), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_records_failure() {
        let (ctx, client) = serve().await;
        ctx.queue.enqueue(NewJob::with_id("x", "https://x.example")).unwrap();

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(client, worker_config("echo boom >&2; exit 3"), cancel.clone()));
        drain(&ctx, 1).await;
        cancel.cancel();
        let stats = worker.await.unwrap().unwrap();

        assert_eq!(stats.failed, 1);
        let stored = ctx.sink.get("x").unwrap().unwrap();
        assert_eq!(stored.record.status, ResultStatus::Failure);
        let payload = stored.record.payload.unwrap();
        assert_eq!(payload["exit_code"], 3);
        assert_eq!(payload["stderr"], "boom");
    }

    fn bulky_job() -> LeasedJob {
        LeasedJob {
            job: crate::queue::Job {
                id: "big".into(),
                url: "https://big.example".into(),
                payload: Some(json!({ "blob": "x".repeat(512 * 1024) })),
                enqueued_at: chrono::Utc::now(),
                requeue_count: 0,
            },
            lease_expires_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_handler_writing_before_reading_input_completes() {
        let config = worker_config("head -c 1048576 /dev/zero | tr '\\0' a; cat > /dev/null");
        let (status, body) = run_handler(&config, &bulky_job()).await.unwrap();
        assert_eq!(status, ResultStatus::Success);
        assert_eq!(body.as_str().map(str::len), Some(1024 * 1024));
    }

    #[tokio::test]
    async fn test_timeout_covers_unread_input() {
        let mut config = worker_config("sleep 30");
        config.job_timeout = Duration::from_millis(300);
        let started = std::time::Instant::now();
        let err = run_handler(&config, &bulky_job()).await.unwrap_err();
        assert!(matches!(err, FleetError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_handler_is_config_error() {
        let (_ctx, client) = serve().await;
        let mut config = worker_config("true");
        config.handler.clear();
        let result = run_worker(client, config, CancellationToken::new()).await;
        assert!(matches!(result, Err(FleetError::Config(_))));
    }
}
