use super::types::FleetError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl FleetError {
    /// Classify this error to determine its type and whether it can be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Retryable errors
            FleetError::TransientIo(_) => ErrorClassification {
                error_type: "TransientIOError",
                retryable: true,
            },
            FleetError::Timeout(_) => ErrorClassification {
                error_type: "TimeoutError",
                retryable: true,
            },
            FleetError::ProcessExit(_) => ErrorClassification {
                error_type: "ProcessExitError",
                retryable: true,
            },
            FleetError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: true,
            },
            FleetError::Database(_) => ErrorClassification {
                error_type: "DatabaseError",
                retryable: true,
            },

            // Non-retryable errors
            FleetError::Validation(_) => ErrorClassification {
                error_type: "ValidationError",
                retryable: false,
            },
            FleetError::Duplicate(_) => ErrorClassification {
                error_type: "DuplicateError",
                retryable: false,
            },
            FleetError::Conflict(_) => ErrorClassification {
                error_type: "ConflictError",
                retryable: false,
            },
            FleetError::NotFound(_) => ErrorClassification {
                error_type: "NotFoundError",
                retryable: false,
            },
            FleetError::ResourceExhaustion(_) => ErrorClassification {
                error_type: "ResourceExhaustion",
                retryable: false,
            },
            FleetError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
            },
            FleetError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: false,
            },
            FleetError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
            },
            FleetError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: false,
            },
        }
    }
}
