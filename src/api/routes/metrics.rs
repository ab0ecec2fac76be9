use axum::{extract::State, http::header, response::IntoResponse};
use crate::api::AppState;

pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.dispatcher.metrics().await;
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
