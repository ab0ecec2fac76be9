use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use crate::api::AppState;
use crate::errors::FleetError;

pub async fn list_dead_letters(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.dispatcher.queue().dead_letters();
    Json(json!({ "total": jobs.len(), "jobs": jobs }))
}

pub async fn requeue_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, FleetError> {
    let job = state.dispatcher.queue().requeue_dead_letter(&id)?;
    Ok(Json(json!({ "requeued": job })))
}
