//! Shared HTTP plumbing for the vendor providers

use std::time::Duration;

use agent_core::{ProviderError, ProviderResult};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(crate) fn build_client(provider: &str, timeout_secs: u64) -> ProviderResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ProviderError::config(provider, format!("failed to create HTTP client: {e}")))
}

/// Send a JSON request and decode a 2xx body; classify everything else.
pub(crate) async fn send_json<T: DeserializeOwned>(provider: &str, request: RequestBuilder) -> ProviderResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::network(provider, e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::network(provider, format!("failed to read body: {e}")))?;

    if !status.is_success() {
        tracing::warn!(provider, status = status.as_u16(), "provider returned error status");
        return Err(ProviderError::from_status(provider, status.as_u16(), error_message(&body)));
    }

    serde_json::from_str(&body).map_err(|e| ProviderError::parse(provider, format!("unexpected response body: {e}")))
}

/// Both vendors wrap failures as `{"error": {"message": ...}}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                "empty error body".into()
            } else {
                body.trim().to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(error_message(body), "Overloaded");
        assert_eq!(error_message("gateway timeout\n"), "gateway timeout");
        assert_eq!(error_message(""), "empty error body");
    }
}
