use axum::{extract::State, Json};
use crate::api::AppState;
use crate::dispatch::FleetStatus;

pub async fn get_status(State(state): State<AppState>) -> Json<FleetStatus> {
    Json(state.dispatcher.status().await)
}
