use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work. `url` is the minimal payload; anything else rides in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub requeue_count: u32,
}

/// Enqueue request; the id is generated when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl NewJob {
    pub fn url(url: impl Into<String>) -> Self {
        Self { id: None, url: url.into(), payload: None }
    }

    pub fn with_id(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self { id: Some(id.into()), url: url.into(), payload: None }
    }
}

/// A job as handed to a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasedJob {
    #[serde(flatten)]
    pub job: Job,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    #[serde(flatten)]
    pub job: Job,
    pub dead_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReclaimReport {
    pub requeued: Vec<String>,
    pub dead_lettered: Vec<DeadLetter>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.dead_lettered.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub leased: usize,
    pub dead_letter: usize,
    pub completed_total: u64,
    pub enqueued_total: u64,
    pub requeued_total: u64,
    pub dead_lettered_total: u64,
}

impl QueueStats {
    /// Jobs not yet finished either way.
    pub fn depth(&self) -> usize {
        self.pending + self.leased
    }
}
