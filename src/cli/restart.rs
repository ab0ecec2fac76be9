use tracing::info;
use crate::cli::commands::RestartArgs;
use crate::errors::FleetError;

pub async fn handle_restart(args: RestartArgs) -> Result<(), FleetError> {
    info!(agent = %args.agent, instance = ?args.instance, "Requesting restart");
    let response = super::client(&args.remote)?
        .restart(&args.agent, args.instance)
        .await?;
    super::print_json(&response)
}
