use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use crate::cli::commands::WorkerArgs;
use crate::errors::{FleetError, RetryConfig};
use crate::worker::{run_worker, WorkerConfig};

pub async fn handle_worker(args: WorkerArgs) -> Result<(), FleetError> {
    let client = super::client(&args.remote)?;
    let worker_id = args
        .worker_id
        .unwrap_or_else(|| format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    let config = WorkerConfig {
        worker_id,
        poll_interval: args.poll_interval,
        concurrency: args.concurrency,
        job_timeout: args.job_timeout,
        handler: args.handler,
        retry: RetryConfig {
            max_retries: args.max_retries,
            base_delay: args.poll_interval.max(Duration::from_millis(100)),
            ..RetryConfig::default()
        },
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, finishing in-flight jobs");
            on_signal.cancel();
        }
    });

    let stats = run_worker(client, config, cancel).await?;
    println!(
        "Processed {} jobs: {} succeeded, {} failed, {} rejected, {} undelivered",
        stats.succeeded + stats.failed + stats.rejected + stats.undelivered,
        stats.succeeded, stats.failed, stats.rejected, stats.undelivered
    );
    Ok(())
}
