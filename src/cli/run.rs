use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use crate::cli::commands::RunArgs;
use crate::config::{parse_config, FleetConfig};
use crate::errors::FleetError;
use crate::orchestrator::{FleetContext, Orchestrator};
use crate::process::OsLauncher;
use crate::sink::ResultSink;
use crate::supervisor::ShutdownReport;

pub async fn handle_run(args: RunArgs) -> Result<ShutdownReport, FleetError> {
    let path = PathBuf::from(&args.config);
    let mut config = parse_config(&path).await?;
    apply_overrides(&mut config, &args);

    info!(
        config = %args.config, agents = config.agents.len(),
        db = %config.database.path, "Starting orchestrator"
    );

    let sink = ResultSink::new(&config.database.path)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let ctx = FleetContext::new(config, Some(path), Arc::new(OsLauncher), sink)?;
    let orchestrator = Orchestrator::new(Arc::new(ctx));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FleetError::Config(format!("Cannot listen on {}: {}", addr, e)))?;

    orchestrator.run(listener).await
}

fn apply_overrides(config: &mut FleetConfig, args: &RunArgs) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db) = &args.db {
        config.database.path = db.clone();
    }
    if let Some(token) = &args.api_token {
        config.server.api_token = Some(token.clone());
    }
}
