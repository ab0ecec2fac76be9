use std::path::PathBuf;
use crate::cli::commands::ValidateArgs;
use crate::config::parse_config;
use crate::errors::FleetError;

pub async fn handle_validate(args: ValidateArgs) -> Result<(), FleetError> {
    let path = PathBuf::from(&args.config);
    let config = parse_config(&path).await?;
    let instances: u32 = config.agents.iter().map(|a| a.instances).sum();
    println!(
        "Configuration is valid: {} ({} agents, {} instances, {} maintenance tasks)",
        args.config,
        config.agents.len(),
        instances,
        config.maintenance.len()
    );
    Ok(())
}
