use crate::cli::commands::StatusArgs;
use crate::errors::FleetError;

pub async fn handle_status(args: StatusArgs) -> Result<(), FleetError> {
    let status = super::client(&args.remote)?.status().await?;
    super::print_json(&status)
}
