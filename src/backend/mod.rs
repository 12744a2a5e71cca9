//! Text-generation backend abstraction and implementations.
//!
//! Defines the [`Backend`] trait and concrete HTTP implementations:
//! - **[`OpenAiBackend`]**: OpenAI chat completions.
//! - **[`HuggingFaceBackend`]**: Hugging Face hosted inference.
//! - **[`OllamaBackend`]**: a local Ollama instance's `/api/generate`.
//!
//! Every backend owns an immutable [`BackendConfig`] value resolved once from
//! configuration (credentials included). HTTP clients are built per call
//! from that value; nothing is shared or mutated between calls.
//!
//! # Retry Strategy
//!
//! Retrying is driven by the caller using [`RetryPolicy`]:
//! - timeouts, HTTP 429, 5xx and connection errors → retry
//! - authentication and invalid-model errors → fail immediately
//! - backoff doubles from the initial delay (1s, 2s by default)

mod huggingface;
mod ollama;
mod openai;

pub use huggingface::HuggingFaceBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendsConfig, ProviderConfig};
use crate::error::{BackendError, PipelineError};

/// Supported provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAi,
    HuggingFace,
    Ollama,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::HuggingFace => "huggingface",
            BackendKind::Ollama => "ollama",
        }
    }

    fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            BackendKind::OpenAi => Some("OPENAI_API_KEY"),
            BackendKind::HuggingFace => Some("HUGGINGFACE_API_KEY"),
            BackendKind::Ollama => None,
        }
    }
}

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Rates {
    pub const FREE: Rates = Rates {
        prompt_per_1k: 0.0,
        completion_per_1k: 0.0,
    };

    /// Published list prices for the models we know about.
    pub fn for_model(kind: BackendKind, model: &str) -> Rates {
        match kind {
            BackendKind::OpenAi => {
                if model.contains("gpt-4o-mini") {
                    Rates {
                        prompt_per_1k: 0.00015,
                        completion_per_1k: 0.0006,
                    }
                } else if model.contains("gpt-4o") {
                    Rates {
                        prompt_per_1k: 0.005,
                        completion_per_1k: 0.015,
                    }
                } else if model.contains("gpt-3.5") {
                    Rates {
                        prompt_per_1k: 0.0005,
                        completion_per_1k: 0.0015,
                    }
                } else {
                    Rates {
                        prompt_per_1k: 0.01,
                        completion_per_1k: 0.03,
                    }
                }
            }
            BackendKind::HuggingFace => Rates {
                prompt_per_1k: 0.0002,
                completion_per_1k: 0.0002,
            },
            BackendKind::Ollama => Rates::FREE,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.prompt_per_1k > 0.0 || self.completion_per_1k > 0.0
    }

    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Everything a backend needs to make a call. Immutable once built.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Provider name from configuration; used in cache keys and the ledger.
    pub name: String,
    pub kind: BackendKind,
    pub model: String,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    pub rates: Rates,
}

impl BackendConfig {
    /// Resolve a provider table into a call-ready config.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BackendUnavailable`] if the provider needs an
    /// API key and the environment variable is unset or empty.
    pub fn from_provider(name: &str, provider: &ProviderConfig) -> Result<Self, PipelineError> {
        let key_env = provider
            .api_key_env
            .as_deref()
            .or(provider.kind.default_api_key_env());

        let api_key = match key_env {
            Some(var) => match std::env::var(var) {
                Ok(v) if !v.trim().is_empty() => Some(v),
                _ => {
                    return Err(PipelineError::BackendUnavailable {
                        backend: name.to_string(),
                        reason: format!("{} environment variable not set", var),
                    })
                }
            },
            None => None,
        };

        let defaults = Rates::for_model(provider.kind, &provider.model);
        let rates = Rates {
            prompt_per_1k: provider.prompt_rate_per_1k.unwrap_or(defaults.prompt_per_1k),
            completion_per_1k: provider
                .completion_rate_per_1k
                .unwrap_or(defaults.completion_per_1k),
        };

        Ok(Self {
            name: name.to_string(),
            kind: provider.kind,
            model: provider.model.clone(),
            url: provider.url.clone(),
            api_key,
            timeout: provider.timeout(),
            max_tokens: provider.max_tokens,
            temperature: provider.temperature,
            rates,
        })
    }
}

/// A single prompt to complete.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Total prompt characters, for token estimation.
    pub fn char_len(&self) -> usize {
        self.prompt.chars().count() + self.system.as_deref().map_or(0, |s| s.chars().count())
    }
}

/// Generated text plus exact token usage when the provider reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// A pluggable text-generation provider.
#[async_trait]
pub trait Backend: Send + Sync {
    fn config(&self) -> &BackendConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    fn is_paid(&self) -> bool {
        self.config().rates.is_paid()
    }

    /// Run one completion. Implementations do not retry.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;
}

/// Build the backend for a provider table.
pub fn create_backend(name: &str, provider: &ProviderConfig) -> Result<Arc<dyn Backend>, PipelineError> {
    let config = BackendConfig::from_provider(name, provider)?;
    Ok(match config.kind {
        BackendKind::OpenAi => Arc::new(OpenAiBackend::new(config)),
        BackendKind::HuggingFace => Arc::new(HuggingFaceBackend::new(config)),
        BackendKind::Ollama => Arc::new(OllamaBackend::new(config)),
    })
}

/// Backends for the configured roles. A role whose backend cannot be built
/// is left empty and logged; the orchestrator treats it as unusable.
#[derive(Clone, Default)]
pub struct BackendSet {
    pub primary: Option<Arc<dyn Backend>>,
    pub secondary: Option<Arc<dyn Backend>>,
    pub summarizer: Option<Arc<dyn Backend>>,
}

impl BackendSet {
    pub fn from_config(config: &BackendsConfig) -> Self {
        let build = |role: &str, name: &Option<String>| -> Option<Arc<dyn Backend>> {
            let name = name.as_ref()?;
            let provider = config.providers.get(name)?;
            match create_backend(name, provider) {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(role, backend = %name, error = %e, "backend not usable");
                    None
                }
            }
        };
        Self {
            primary: build("primary", &config.primary),
            secondary: build("secondary", &config.secondary),
            summarizer: build("summarizer", &config.summarizer),
        }
    }
}

/// Retry schedule for backend calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BackendsConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): initial, 2x, 4x, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_backoff * (1u32 << retry.saturating_sub(1).min(5))
    }
}

/// Read a non-success response body, tolerating read failures.
pub(crate) async fn error_from_response(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    BackendError::from_status(status, body)
}
