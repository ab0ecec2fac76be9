pub mod agents;
pub mod api;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod health;
pub mod maintenance;
pub mod orchestrator;
pub mod process;
pub mod queue;
pub mod sink;
pub mod supervisor;
pub mod worker;
