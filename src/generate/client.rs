//! HTTP client for the generation endpoint.

use crate::config::GenerationConfig;
use crate::error::ExternalError;
use crate::generate::{Completion, TextGenerator};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct AnthropicGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExternalError::transient(None, format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> ExternalError {
    if e.is_timeout() {
        ExternalError::Timeout(REQUEST_TIMEOUT)
    } else {
        ExternalError::transient(None, format!("request failed: {e}"))
    }
}

fn map_status_error(status: u16, body: &str) -> ExternalError {
    let message = format!("generation endpoint returned {status}: {body}");
    if status == 429 || status >= 500 {
        ExternalError::transient(Some(status), message)
    } else {
        ExternalError::permanent(status, message)
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, ExternalError> {
        let url = format!("{}/v1/messages", self.base_url);
        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status.as_u16(), &body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::transient(None, format!("malformed response: {e}")))?;
        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        Ok(Completion {
            text,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(map_status_error(429, "slow down").is_retryable());
        assert!(map_status_error(503, "unavailable").is_retryable());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!map_status_error(400, "bad request").is_retryable());
        assert!(!map_status_error(401, "bad key").is_retryable());
    }
}
