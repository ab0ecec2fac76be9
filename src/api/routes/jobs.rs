use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::AppState;
use crate::errors::FleetError;
use crate::queue::NewJob;

#[derive(Deserialize)]
pub struct PullQuery {
    pub max: Option<usize>,
}

/// Either explicit jobs or bare URLs; both may be given.
#[derive(Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub jobs: Vec<NewJob>,
    #[serde(default)]
    pub urls: Vec<String>,
}

pub async fn pull_jobs(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Json<Value> {
    let jobs = state.dispatcher.pull_jobs(query.max);
    Json(json!({ "jobs": jobs }))
}

pub async fn enqueue_jobs(
    State(state): State<AppState>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), FleetError> {
    let Json(req) = body.map_err(|e| FleetError::Validation(e.body_text()))?;

    let mut jobs = req.jobs;
    jobs.extend(req.urls.into_iter().map(NewJob::url));
    if jobs.is_empty() {
        return Err(FleetError::Validation("request contains no jobs".into()));
    }

    let queued = state.dispatcher.enqueue(jobs)?;
    let ids: Vec<&str> = queued.iter().map(|j| j.id.as_str()).collect();
    Ok((
        StatusCode::CREATED,
        Json(json!({ "queued": queued.len(), "ids": ids })),
    ))
}
