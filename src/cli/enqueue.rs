use crate::cli::commands::EnqueueArgs;
use crate::errors::FleetError;
use crate::queue::NewJob;

pub async fn handle_enqueue(args: EnqueueArgs) -> Result<(), FleetError> {
    let jobs: Vec<NewJob> = args.urls.into_iter().map(NewJob::url).collect();
    let response = super::client(&args.remote)?.enqueue(&jobs).await?;
    super::print_json(&response)
}
