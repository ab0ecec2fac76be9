pub mod commands;
pub mod enqueue;
pub mod restart;
pub mod run;
pub mod status;
pub mod validate;
pub mod worker;

pub use commands::{Cli, Commands, LogFormat};

use crate::errors::FleetError;
use crate::worker::DispatchClient;
use commands::RemoteArgs;

fn client(remote: &RemoteArgs) -> Result<DispatchClient, FleetError> {
    DispatchClient::new(&remote.orchestrator_url, remote.api_token.clone(), remote.request_timeout)
}

fn print_json(value: &serde_json::Value) -> Result<(), FleetError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
