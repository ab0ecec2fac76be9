pub mod connection;
pub mod results;
pub mod schema;
pub mod types;

pub use connection::ResultSink;
pub use types::{ManifestEntry, ResultRecord, ResultStatus, StoredResult};
