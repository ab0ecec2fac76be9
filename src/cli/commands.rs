use std::time::Duration;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fleetd", version, about = "Process supervisor and job dispatcher for agent fleets")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "FLEETD_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator: supervise agents and serve the dispatch API
    Run(RunArgs),
    /// Poll the dispatch API and run a handler command per job
    Worker(WorkerArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
    /// Show the status of a running orchestrator
    Status(StatusArgs),
    /// Restart an agent (or one of its instances) on a running orchestrator
    Restart(RestartArgs),
    /// Queue URLs as jobs on a running orchestrator
    Enqueue(EnqueueArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// YAML configuration file
    #[arg(short, long, default_value = "fleetd.yaml", env = "FLEETD_CONFIG")]
    pub config: String,

    /// Override server.host
    #[arg(long, env = "FLEETD_HOST")]
    pub host: Option<String>,

    /// Override server.port
    #[arg(short, long, env = "FLEETD_PORT")]
    pub port: Option<u16>,

    /// Override database.path
    #[arg(long, env = "FLEETD_DB")]
    pub db: Option<String>,

    /// Override server.api_token
    #[arg(long, env = "FLEETD_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,
}

/// Where to reach a running orchestrator.
#[derive(Args, Clone)]
pub struct RemoteArgs {
    /// Orchestrator base URL
    #[arg(long, default_value = "http://127.0.0.1:8000", env = "FLEETD_URL")]
    pub orchestrator_url: String,

    /// Bearer token for the dispatch API
    #[arg(long, env = "FLEETD_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Request timeout
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,
}

#[derive(Args, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Identity reported with every result (defaults to a random id)
    #[arg(long, env = "FLEETD_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Sleep between polls when the queue is empty
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub poll_interval: Duration,

    /// Jobs handled at once
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Kill a handler that runs longer than this
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
    pub job_timeout: Duration,

    /// Retries for a failed poll or result post
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Handler command; receives the job JSON on stdin
    #[arg(last = true, required = true)]
    pub handler: Vec<String>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// YAML configuration file
    pub config: String,
}

#[derive(Args, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
}

#[derive(Args, Clone)]
pub struct RestartArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Agent id
    pub agent: String,

    /// Restart only this instance
    #[arg(long)]
    pub instance: Option<u32>,
}

#[derive(Args, Clone)]
pub struct EnqueueArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// URLs to queue
    #[arg(required = true)]
    pub urls: Vec<String>,
}
