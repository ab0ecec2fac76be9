use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network hiccup while polling or posting. Retried by the caller.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Process exited: {0}")]
    ProcessExit(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for FleetError {
    fn from(e: rusqlite::Error) -> Self {
        FleetError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FleetError::Timeout(e.to_string())
        } else if e.is_decode() {
            FleetError::Validation(format!("Malformed response body: {}", e))
        } else {
            FleetError::TransientIo(e.to_string())
        }
    }
}
