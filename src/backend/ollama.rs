//! Local Ollama backend.

use async_trait::async_trait;

use super::{error_from_response, Backend, BackendConfig, Completion, CompletionRequest};
use crate::error::BackendError;

const DEFAULT_URL: &str = "http://localhost:11434";

/// Calls `POST /api/generate` with streaming disabled.
pub struct OllamaBackend {
    config: BackendConfig,
}

impl OllamaBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let config = &self.config;
        let url = config.url.as_deref().unwrap_or(DEFAULT_URL);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        let mut body = serde_json::json!({
            "model": config.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "num_predict": config.max_tokens,
                "temperature": config.temperature,
            },
        });
        if let Some(system) = &request.system {
            body["system"] = serde_json::Value::String(system.clone());
        }

        let response = client
            .post(format!("{}/api/generate", url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| match BackendError::from(e) {
                BackendError::Connection(msg) => BackendError::Connection(format!(
                    "is Ollama running at {}? {}",
                    url, msg
                )),
                other => other,
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let json: serde_json::Value = response.json().await?;
        parse_generate_response(&json)
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<Completion, BackendError> {
    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .ok_or_else(|| BackendError::BadResponse("missing response field".to_string()))?;

    let count = |field: &str| json.get(field).and_then(|v| v.as_u64()).map(|v| v as u32);

    Ok(Completion {
        text: text.trim().to_string(),
        prompt_tokens: count("prompt_eval_count"),
        completion_tokens: count("eval_count"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_and_eval_counts() {
        let json = serde_json::json!({
            "model": "llama3",
            "response": "Local insight",
            "done": true,
            "prompt_eval_count": 26,
            "eval_count": 12
        });
        let completion = parse_generate_response(&json).unwrap();
        assert_eq!(completion.text, "Local insight");
        assert_eq!(completion.prompt_tokens, Some(26));
        assert_eq!(completion.completion_tokens, Some(12));
    }
}
