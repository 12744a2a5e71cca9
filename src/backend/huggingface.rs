//! Hugging Face hosted inference backend.

use async_trait::async_trait;

use super::{error_from_response, Backend, BackendConfig, Completion, CompletionRequest};
use crate::error::BackendError;

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";

/// Calls the text-generation inference endpoint for `model`.
///
/// The API does not report token usage, so usage is estimated by the ledger.
pub struct HuggingFaceBackend {
    config: BackendConfig,
}

impl HuggingFaceBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> String {
        match &self.config.url {
            Some(url) => url.clone(),
            None => format!("{}/{}", DEFAULT_BASE_URL, self.config.model),
        }
    }
}

#[async_trait]
impl Backend for HuggingFaceBackend {
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

        let inputs = match &request.system {
            Some(system) => format!("{}\n\n{}", system, request.prompt),
            None => request.prompt.clone(),
        };

        let body = serde_json::json!({
            "inputs": inputs,
            "parameters": {
                "max_new_tokens": config.max_tokens,
                "temperature": config.temperature,
                "return_full_text": false,
            },
            "options": { "wait_for_model": true },
        });

        let response = client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let json: serde_json::Value = response.json().await?;
        parse_generation(&json)
    }
}

/// Accepts both `[{"generated_text": ..}]` and `{"generated_text": ..}`.
fn parse_generation(json: &serde_json::Value) -> Result<Completion, BackendError> {
    let item = match json.as_array() {
        Some(items) => items.first(),
        None => Some(json),
    };
    let text = item
        .and_then(|i| i.get("generated_text"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| BackendError::BadResponse("missing generated_text".to_string()))?;

    Ok(Completion {
        text: text.trim().to_string(),
        prompt_tokens: None,
        completion_tokens: None,
    })
}
