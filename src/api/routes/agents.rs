use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::AppState;
use crate::errors::FleetError;

#[derive(Deserialize)]
pub struct RestartQuery {
    pub instance: Option<u32>,
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Value> {
    let instances = state.dispatcher.supervisor().snapshot().await;
    Json(json!({ "agents": instances }))
}

pub async fn restart_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RestartQuery>,
) -> Result<Json<Value>, FleetError> {
    let restarted = state.dispatcher.supervisor().restart(&id, query.instance).await?;
    Ok(Json(json!({ "agent": id, "restarted": restarted })))
}
