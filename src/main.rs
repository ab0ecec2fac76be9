use clap::Parser;
use fleetd::cli::{self, LogFormat};
use fleetd::errors::FleetError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // RUST_LOG wins over -v
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match cli.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.with_ansi(!cli.no_color).init(),
    }

    let result = match cli.command {
        cli::Commands::Run(args) => match cli::run::handle_run(args).await {
            Ok(report) if report.clean() => Ok(()),
            Ok(report) => {
                eprintln!(
                    "Shutdown was not clean: {} force-killed, failed agents: {:?}",
                    report.forced.len(),
                    report.failed_agents
                );
                std::process::exit(1);
            }
            Err(e) => Err(e),
        },
        cli::Commands::Worker(args) => cli::worker::handle_worker(args).await,
        cli::Commands::Validate(args) => cli::validate::handle_validate(args).await,
        cli::Commands::Status(args) => cli::status::handle_status(args).await,
        cli::Commands::Restart(args) => cli::restart::handle_restart(args).await,
        cli::Commands::Enqueue(args) => cli::enqueue::handle_enqueue(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let exit_code = match &e {
            FleetError::Config(_) | FleetError::Yaml(_) => 2,
            FleetError::Database(_) => 3,
            _ => 1,
        };
        std::process::exit(exit_code);
    }
}
