pub mod agents;
pub mod dead_letter;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod results;
pub mod status;
