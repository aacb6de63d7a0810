//! Shared HTTP helpers for the provider clients.
//!
//! Every provider classifies failures the same way:
//! - HTTP 429 and 5xx → [`ServiceError::Retryable`]
//! - other non-success statuses → [`ServiceError::Terminal`]
//! - connection and transport errors → [`ServiceError::Retryable`]
//! - a success response that cannot be parsed → [`ServiceError::Terminal`]
//!
//! Retrying is not done here; [`CallPolicy`](crate::policy::CallPolicy)
//! owns timeouts and backoff.

use docchat_core::error::ServiceError;
use reqwest::{Response, StatusCode};

/// Longest slice of an error body carried into an error message.
const MAX_ERROR_BODY: usize = 500;

pub fn client() -> Result<reqwest::Client, anyhow::Error> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("docchat/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Map a transport failure from `reqwest`.
pub fn transport_error(provider: &str, err: reqwest::Error) -> ServiceError {
    ServiceError::Retryable(format!("{} request failed: {}", provider, err))
}

/// Map a non-success status and its body.
pub fn status_error(provider: &str, status: StatusCode, body: &str) -> ServiceError {
    let body = truncate(body);
    let message = format!("{} API error {}: {}", provider, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ServiceError::Retryable(message)
    } else {
        ServiceError::Terminal(message)
    }
}

/// Pass successful responses through; classify the rest.
pub async fn check_status(provider: &str, response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(provider, status, &body))
}

/// Check the status and parse the body as JSON.
pub async fn json_body(provider: &str, response: Response) -> Result<serde_json::Value, ServiceError> {
    let response = check_status(provider, response).await?;
    response
        .json()
        .await
        .map_err(|e| ServiceError::Terminal(format!("invalid {} response: {}", provider, e)))
}

/// Read an API key from the environment variable named in config.
pub fn api_key_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
