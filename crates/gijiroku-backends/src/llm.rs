//! Chat client for a local Ollama-compatible host.
//!
//! One JSON request, one JSON response (`stream: false`). Transport and
//! status failures map onto the shared error kinds; the engine decides what
//! is worth retrying.

use crate::{ChatBackend, ChatOptions};
use async_trait::async_trait;
use gijiroku_common::{AppError, Result};
use gijiroku_protocol::ChatReply;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gemma-2-2b-jpn-it".to_string(),
        }
    }
}

pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    model: Option<String>,
    done_reason: Option<String>,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::LlmUnavailable(format!("HTTP client build failed: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &ChatOptions,
    ) -> Result<ChatReply> {
        let request = GenerateRequest {
            model: &self.config.model,
            system: system_prompt,
            prompt: user_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: options.temperature,
            },
        };

        let response = self
            .client
            .post(self.endpoint("/api/generate"))
            .json(&request)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::LlmTimeout(options.timeout)
                } else {
                    AppError::LlmUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::LlmModelMissing(self.config.model.clone()));
        }
        if status.is_server_error() {
            return Err(AppError::LlmUnavailable(format!("server error {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LlmBadResponse(format!(
                "unexpected status {status}: {body}"
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::LlmBadResponse(format!("invalid JSON: {e}")))?;
        let text = body
            .response
            .ok_or_else(|| AppError::LlmBadResponse("missing `response` field".into()))?;
        debug!(
            "LLM reply: {} chars, finish={:?}",
            text.len(),
            body.done_reason
        );

        Ok(ChatReply {
            text,
            model: body.model.unwrap_or_else(|| self.config.model.clone()),
            finish_reason: body.done_reason,
        })
    }

    async fn ping(&self) -> bool {
        self.client
            .get(self.endpoint("/api/tags"))
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            model: "gemma-2-2b-jpn-it",
            system: "校正してください",
            prompt: "本文",
            stream: false,
            options: GenerateOptions { temperature: 0.2 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gemma-2-2b-jpn-it");
        assert_eq!(json["stream"], false);
        let temperature = json["options"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let body: GenerateResponse = serde_json::from_str(r#"{"response": "結果"}"#).unwrap();
        assert_eq!(body.response.as_deref(), Some("結果"));
        assert!(body.model.is_none());
        assert!(body.done_reason.is_none());

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.response.is_none());
    }

    #[test]
    fn test_endpoint_normalizes_trailing_slash() {
        let client = OllamaClient::new(LlmConfig {
            base_url: "http://127.0.0.1:11434/".into(),
            model: "m".into(),
        })
        .unwrap();
        assert_eq!(
            client.endpoint("/api/generate"),
            "http://127.0.0.1:11434/api/generate"
        );
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_unavailable() {
        // Port 9 (discard) is expected to refuse connections.
        let client = OllamaClient::new(LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            model: "m".into(),
        })
        .unwrap();
        let err = client
            .chat("s", "u", &ChatOptions {
                timeout: Duration::from_secs(2),
                temperature: 0.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::LlmUnavailable(_) | AppError::LlmTimeout(_)
        ));
    }
}
