//! Error taxonomy for the ingestion and insight pipeline.
//!
//! Extraction and resolution failures abort a job into `failed`. Backend
//! failures are per-category and normally end up as placeholder content
//! rather than surfacing here. Cache failures are logged and never
//! propagated past the cache module.

use thiserror::Error;

/// Errors surfaced by the pipeline's public operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No usable text could be extracted from the source.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// No filing could be located for the given company identifier.
    #[error("no {form} filing found for '{company}': {guidance}")]
    FilingNotFound {
        company: String,
        form: String,
        guidance: String,
    },

    /// A filing was located but every extraction strategy produced too little text.
    #[error("filing at {url} yielded insufficient content ({chars} chars, need {required})")]
    InsufficientContent {
        url: String,
        chars: usize,
        required: usize,
    },

    /// Missing or invalid backend credentials/configuration.
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// A backend call failed after all retries.
    #[error("backend '{backend}' call failed: {source}")]
    BackendCallFailed {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// Monthly spend is over the admission threshold.
    #[error("monthly budget exceeded ({used_percent:.1}% used)")]
    BudgetExceeded { used_percent: f64 },

    /// Response cache failure. Only ever logged.
    #[error("cache error: {0}")]
    Cache(String),

    /// The document reference cannot be mapped to an extraction strategy.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Unknown insight category key.
    #[error("unknown insight category: {0}")]
    UnknownCategory(String),

    /// The documents given for a comparison cannot be compared.
    #[error("invalid comparison: {0}")]
    Comparison(String),

    /// The referenced document or job does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Persistence layer failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    /// Short machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Extraction(_) => "extraction_error",
            PipelineError::FilingNotFound { .. } => "filing_not_found",
            PipelineError::InsufficientContent { .. } => "insufficient_content",
            PipelineError::BackendUnavailable { .. } => "backend_unavailable",
            PipelineError::BackendCallFailed { .. } => "backend_call_failed",
            PipelineError::BudgetExceeded { .. } => "budget_exceeded",
            PipelineError::Cache(_) => "cache_error",
            PipelineError::InvalidSource(_) => "invalid_source",
            PipelineError::UnknownCategory(_) => "unknown_category",
            PipelineError::Comparison(_) => "invalid_comparison",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Storage(_) => "internal",
        }
    }
}

/// Failure of a single text-generation call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("unexpected response: {0}")]
    BadResponse(String),
}

impl BackendError {
    /// Timeouts, rate limits, 5xx and connection failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout
                | BackendError::RateLimited(_)
                | BackendError::Server { .. }
                | BackendError::Connection(_)
        )
    }

    /// Map an HTTP error status and body to an error class.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => BackendError::Auth(body),
            404 => BackendError::InvalidModel(body),
            400 if body.to_lowercase().contains("model") => BackendError::InvalidModel(body),
            408 => BackendError::Timeout,
            429 => BackendError::RateLimited(body),
            s if s >= 500 => BackendError::Server { status: s, body },
            s => BackendError::BadResponse(format!("HTTP {}: {}", s, body)),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::BadResponse(e.to_string())
        } else {
            BackendError::Connection(e.to_string())
        }
    }
}
