//! OpenAI chat completions backend.

use async_trait::async_trait;

use super::{error_from_response, Backend, BackendConfig, Completion, CompletionRequest};
use crate::error::BackendError;

const DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Calls `POST /v1/chat/completions` with a bearer key.
pub struct OpenAiBackend {
    config: BackendConfig,
}

impl OpenAiBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let config = &self.config;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Auth("no API key configured".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        let body = serde_json::json!({
            "model": config.model,
            "messages": messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });

        let response = client
            .post(config.url.as_deref().unwrap_or(DEFAULT_URL))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

/// Pull the first choice's message and the usage block.
fn parse_chat_response(json: &serde_json::Value) -> Result<Completion, BackendError> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| BackendError::BadResponse("missing choices[0].message.content".to_string()))?;

    let usage = json.get("usage");
    let tokens = |field: &str| {
        usage
            .and_then(|u| u.get(field))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    };

    Ok(Completion {
        text: text.trim().to_string(),
        prompt_tokens: tokens("prompt_tokens"),
        completion_tokens: tokens("completion_tokens"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_and_usage() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  <p>Moat</p> " } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 40 }
        });
        let completion = parse_chat_response(&json).unwrap();
        assert_eq!(completion.text, "<p>Moat</p>");
        assert_eq!(completion.prompt_tokens, Some(120));
        assert_eq!(completion.completion_tokens, Some(40));
    }

    #[test]
    fn missing_choices_is_bad_response() {
        let err = parse_chat_response(&serde_json::json!({ "error": "x" })).unwrap_err();
        assert!(matches!(err, BackendError::BadResponse(_)));
    }
}
