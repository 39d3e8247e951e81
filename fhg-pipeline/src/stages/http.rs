//! Shared HTTP plumbing for the external stage adapters

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::StageError;

const USER_AGENT: &str = concat!("fhg-pipeline/", env!("CARGO_PKG_VERSION"));

/// One client shared by every adapter; per-call timeouts come from each stage
pub fn build_client() -> Result<reqwest::Client, StageError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| StageError::Transport(format!("HTTP client init failed: {}", e)))
}

/// Overloaded or unreachable upstream
pub fn is_transport_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

/// Map a send error to the failure class the retry policy understands
pub fn send_error(e: reqwest::Error) -> StageError {
    if e.is_decode() {
        StageError::Malformed(e.to_string())
    } else {
        StageError::Transport(e.to_string())
    }
}

/// Check the status and decode the JSON body
pub async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StageError> {
    let status = response.status();

    if is_transport_status(status) {
        return Err(StageError::Transport(format!("HTTP {}", status.as_u16())));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(StageError::Application(format!(
            "HTTP {}: {}",
            status.as_u16(),
            snippet.trim()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| StageError::Transport(format!("reading response body: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| StageError::Malformed(e.to_string()))
}
