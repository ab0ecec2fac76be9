pub mod auth;
pub mod errors;
pub mod routes;

use std::sync::Arc;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;
use crate::dispatch::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, api_token: Option<String>) -> Self {
        Self { dispatcher, api_token }
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/jobs", get(routes::jobs::pull_jobs).post(routes::jobs::enqueue_jobs))
        .route("/results", post(routes::results::submit_result).get(routes::results::list_results))
        .route("/results/:id", get(routes::results::get_result))
        .route("/status", get(routes::status::get_status))
        .route("/agents", get(routes::agents::list_agents))
        .route("/agents/:id/restart", post(routes::agents::restart_agent))
        .route("/dead-letter", get(routes::dead_letter::list_dead_letters))
        .route("/dead-letter/:id/requeue", post(routes::dead_letter::requeue_dead_letter))
        .route("/metrics", get(routes::metrics::get_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::api_auth_middleware));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
