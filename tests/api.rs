use axum::http::StatusCode;
use axum::body::Body;
use http_body_util::BodyExt;
use tower::ServiceExt;
use serde_json::{json, Value};
use fleetd::api::{build_router, AppState};
use fleetd::config::parse_config_str;
use fleetd::orchestrator::{FleetContext, Orchestrator};
use fleetd::process::scripted::ScriptedLauncher;
use fleetd::sink::ResultSink;
use std::sync::Arc;

const CONFIG: &str = r#"
queue:
  lease_ttl: 60s
  max_requeues: 2
dispatch:
  max_batch: 5
supervisor:
  grace_period: 100ms
agents:
  - id: crawler
    command: [crawler]
    instances: 2
"#;

struct TestFleet {
    orchestrator: Orchestrator,
    launcher: Arc<ScriptedLauncher>,
    state: AppState,
}

fn create_fleet(yaml: &str, token: Option<&str>) -> TestFleet {
    let config = parse_config_str(yaml).unwrap();
    let launcher = ScriptedLauncher::new();
    let ctx = FleetContext::new(config, None, launcher.clone(), ResultSink::in_memory().unwrap()).unwrap();
    let state = AppState::new(ctx.dispatcher.clone(), token.map(String::from));
    TestFleet {
        orchestrator: Orchestrator::new(Arc::new(ctx)),
        launcher,
        state,
    }
}

fn app(state: &AppState) -> axum::Router {
    build_router(state.clone())
}

fn make_request(method: &str, uri: &str, body: Option<Value>) -> axum::http::Request<Body> {
    let builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    match body {
        Some(b) => builder.body(Body::from(serde_json::to_string(&b).unwrap())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn response_json(response: axum::http::Response<Body>) -> Value {
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        panic!("Empty response body. Status: {}, Headers: {:?}", parts.status, parts.headers);
    }
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("JSON parse error: {}. Body: {:?}", e, String::from_utf8_lossy(&bytes)))
}

async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let response = app(state).oneshot(make_request(method, uri, body)).await.unwrap();
    let status = response.status();
    (status, response_json(response).await)
}

#[tokio::test]
async fn test_health_endpoint() {
    let fleet = create_fleet(CONFIG, None);
    let (status, body) = call(&fleet.state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "fleetd");
}

#[tokio::test]
async fn test_fifo_dispatch_and_duplicate_result() {
    let fleet = create_fleet(CONFIG, None);
    let state = &fleet.state;

    let (status, body) = call(state, "POST", "/jobs", Some(json!({
        "jobs": [{"id": "a", "url": "https://a.example"}, {"id": "b", "url": "https://b.example"}]
    }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["queued"], 2);

    let (_, first) = call(state, "GET", "/jobs?max=1", None).await;
    assert_eq!(first["jobs"][0]["id"], "a");
    assert!(first["jobs"][0]["lease_expires_at"].is_string());
    let (_, second) = call(state, "GET", "/jobs?max=1", None).await;
    assert_eq!(second["jobs"][0]["id"], "b");
    let (_, empty) = call(state, "GET", "/jobs", None).await;
    assert_eq!(empty["jobs"], json!([]));

    let result = json!({"id": "a", "url": "https://a.example", "status": "success", "payload": {"links": 4}});
    let (status, receipt) = call(state, "POST", "/results", Some(result.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["status"], "accepted");
    assert_eq!(receipt["job_id"], "a");

    let (status, body) = call(state, "POST", "/results", Some(result)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "DuplicateError");

    let (_, listing) = call(state, "GET", "/results", None).await;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["results"][0]["job_id"], "a");

    let (status, stored) = call(state, "GET", "/results/a", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["payload"], json!({"links": 4}));
    let (status, _) = call(state, "GET", "/results/b", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pull_is_capped_by_max_batch() {
    let fleet = create_fleet(CONFIG, None);
    let urls: Vec<String> = (0..8).map(|i| format!("https://{}.example", i)).collect();
    let (status, _) = call(&fleet.state, "POST", "/jobs", Some(json!({ "urls": urls }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = call(&fleet.state, "GET", "/jobs?max=50", None).await;
    assert_eq!(body["jobs"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_enqueue_rejects_duplicates_and_empty_bodies() {
    let fleet = create_fleet(CONFIG, None);
    let state = &fleet.state;
    let job = json!({"jobs": [{"id": "a", "url": "https://a.example"}]});
    call(state, "POST", "/jobs", Some(job.clone())).await;

    let (status, _) = call(state, "POST", "/jobs", Some(job)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(state, "POST", "/jobs", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_result_bodies() {
    let fleet = create_fleet(CONFIG, None);
    let state = &fleet.state;

    let response = app(state)
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/results")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, _) = call(state, "POST", "/results", Some(json!({"status": "success"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(state, "POST", "/results", Some(json!({"id": "a", "status": "maybe"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_result_for_unknown_job_conflicts() {
    let fleet = create_fleet(CONFIG, None);
    let (status, _) = call(
        &fleet.state, "POST", "/results",
        Some(json!({"id": "ghost", "url": "https://ghost.example", "status": "failure"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_agents_and_restart() {
    let fleet = create_fleet(CONFIG, None);
    fleet.orchestrator.start_fleet().await;
    let state = &fleet.state;

    let (status, body) = call(state, "GET", "/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    let agents = body["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0]["state"], "starting");

    let (status, body) = call(state, "POST", "/agents/crawler/restart?instance=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restarted"][0]["index"], 1);
    assert_eq!(body["restarted"][0]["state"], "starting");
    assert_eq!(fleet.launcher.launches("crawler"), 3);

    let (status, body) = call(state, "POST", "/agents/nobody/restart", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFoundError");
}

#[tokio::test]
async fn test_status_reports_queue_and_agents() {
    let fleet = create_fleet(CONFIG, None);
    fleet.orchestrator.start_fleet().await;
    call(&fleet.state, "POST", "/jobs", Some(json!({"urls": ["https://a.example"]}))).await;

    let (status, body) = call(&fleet.state, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queue"]["pending"], 1);
    assert_eq!(body["agents"]["instances"], 2);
    assert_eq!(body["agents"]["states"]["starting"], 2);
}

#[tokio::test]
async fn test_dead_letter_listing_and_requeue() {
    let fleet = create_fleet("queue:\n  lease_ttl: 1s\n  max_requeues: 0\n", None);
    let ctx = fleet.orchestrator.context();
    call(&fleet.state, "POST", "/jobs", Some(json!({"jobs": [{"id": "a", "url": "https://a.example"}]}))).await;

    let t0 = chrono::Utc::now();
    ctx.queue.lease_at(1, t0);
    fleet.orchestrator.tick(t0 + chrono::Duration::seconds(2)).await;

    let (status, body) = call(&fleet.state, "GET", "/dead-letter", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["jobs"][0]["id"], "a");

    let (status, body) = call(&fleet.state, "POST", "/dead-letter/a/requeue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requeued"]["id"], "a");
    let (status, _) = call(&fleet.state, "POST", "/dead-letter/a/requeue", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = call(&fleet.state, "GET", "/jobs", None).await;
    assert_eq!(body["jobs"][0]["id"], "a");
}

#[tokio::test]
async fn test_metrics_exposition() {
    let fleet = create_fleet(CONFIG, None);
    fleet.orchestrator.start_fleet().await;
    call(&fleet.state, "POST", "/jobs", Some(json!({"urls": ["https://a.example", "https://b.example"]}))).await;

    let response = app(&fleet.state).oneshot(make_request("GET", "/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("fleetd_queue_depth 2\n"));
    assert!(text.contains("fleetd_agent_instances{agent=\"crawler\",state=\"starting\"} 2\n"));
}

#[tokio::test]
async fn test_api_token_required_when_configured() {
    let fleet = create_fleet(CONFIG, Some("s3cret"));

    let (status, _) = call(&fleet.state, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/status")
        .header("Authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let response = app(&fleet.state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Liveness stays open
    let (status, _) = call(&fleet.state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
