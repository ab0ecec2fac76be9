use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::AppState;
use crate::dispatch::{ResultSubmission, SubmissionReceipt};
use crate::errors::FleetError;

const MAX_LIST: usize = 1000;

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub async fn submit_result(
    State(state): State<AppState>,
    body: Result<Json<ResultSubmission>, JsonRejection>,
) -> Result<Json<SubmissionReceipt>, FleetError> {
    let Json(submission) = body.map_err(|e| FleetError::Validation(e.body_text()))?;
    let receipt = state.dispatcher.submit_result(submission).await?;
    Ok(Json(receipt))
}

pub async fn list_results(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, FleetError> {
    let limit = query.limit.unwrap_or(50).min(MAX_LIST);
    let sink = state.dispatcher.sink();
    let results = sink.recent(limit)?;
    let total = sink.count()?;
    Ok(Json(json!({ "results": results, "total": total })))
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, FleetError> {
    match state.dispatcher.sink().get(&id)? {
        Some(result) => Ok(Json(serde_json::to_value(result)?)),
        None => Err(FleetError::NotFound(format!("no result recorded for job '{}'", id))),
    }
}
