use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::errors::FleetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failure,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl std::str::FromStr for ResultStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(FleetError::Validation(format!(
                "status must be 'success' or 'failure', got '{}'", other
            ))),
        }
    }
}

/// A completed job's outcome as handed off for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: String,
    pub worker: Option<String>,
    pub url: String,
    pub status: ResultStatus,
    pub payload: Option<Value>,
    pub received_at: DateTime<Utc>,
}

/// Ledger row pointing at the stored result for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub job_id: String,
    pub result_seq: i64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredResult {
    pub seq: i64,
    #[serde(flatten)]
    pub record: ResultRecord,
    pub recorded_at: DateTime<Utc>,
}
