use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use crate::errors::FleetError;

impl FleetError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FleetError::Validation(_) | FleetError::Json(_) => StatusCode::BAD_REQUEST,
            FleetError::Duplicate(_) | FleetError::Conflict(_) => StatusCode::CONFLICT,
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            FleetError::ResourceExhaustion(_) => StatusCode::SERVICE_UNAVAILABLE,
            FleetError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let kind = self.classify().error_type;
        (status, Json(json!({"error": self.to_string(), "kind": kind}))).into_response()
    }
}
