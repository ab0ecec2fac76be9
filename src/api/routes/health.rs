use axum::Json;
use serde_json::{json, Value};

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "fleetd",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("FLEETD_GIT_HASH"),
        "built_at": option_env!("FLEETD_BUILD_TIMESTAMP"),
    }))
}
