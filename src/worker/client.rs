use std::time::Duration;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use crate::dispatch::ResultSubmission;
use crate::errors::FleetError;
use crate::queue::{LeasedJob, NewJob};

#[derive(Deserialize)]
struct JobsResponse {
    jobs: Vec<LeasedJob>,
}

/// HTTP client for the dispatch API, used by workers and the CLI.
#[derive(Debug, Clone)]
pub struct DispatchClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl DispatchClient {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self, FleetError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn pull(&self, max: usize) -> Result<Vec<LeasedJob>, FleetError> {
        let request = self.client.get(self.url("/jobs")).query(&[("max", max)]);
        let body: JobsResponse = self.send(request).await?;
        Ok(body.jobs)
    }

    pub async fn submit(&self, submission: &ResultSubmission) -> Result<Value, FleetError> {
        self.send(self.client.post(self.url("/results")).json(submission)).await
    }

    pub async fn enqueue(&self, jobs: &[NewJob]) -> Result<Value, FleetError> {
        self.send(self.client.post(self.url("/jobs")).json(&json!({ "jobs": jobs }))).await
    }

    pub async fn status(&self) -> Result<Value, FleetError> {
        self.send(self.client.get(self.url("/status"))).await
    }

    pub async fn restart(&self, agent: &str, instance: Option<u32>) -> Result<Value, FleetError> {
        let mut request = self.client.post(self.url(&format!("/agents/{}/restart", agent)));
        if let Some(index) = instance {
            request = request.query(&[("instance", index)]);
        }
        self.send(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, mut request: RequestBuilder) -> Result<T, FleetError> {
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        Err(error_from_response(response).await)
    }
}

/// Map an error response back onto the taxonomy the server used to produce it.
async fn error_from_response(response: Response) -> FleetError {
    let status = response.status();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        StatusCode::BAD_REQUEST => FleetError::Validation(message),
        StatusCode::CONFLICT if message.starts_with("Duplicate") => FleetError::Duplicate(message),
        StatusCode::CONFLICT => FleetError::Conflict(message),
        StatusCode::NOT_FOUND => FleetError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FleetError::Config(message),
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => FleetError::Timeout(message),
        s if s.is_server_error() => FleetError::TransientIo(message),
        _ => FleetError::Internal(message),
    }
}
