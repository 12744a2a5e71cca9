//! JSON HTTP API over the pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Submit a document; returns 202 with ids |
//! | `GET`  | `/documents/{id}/status` | Job status |
//! | `POST` | `/documents/{id}/cancel` | Cancel a pending or running job |
//! | `POST` | `/documents/{id}/regenerate/{category}` | Regenerate one insight |
//! | `GET`  | `/documents/{id}/insights` | Persisted insights |
//! | `GET`  | `/usage` | Monthly usage and budget status |
//! | `GET`  | `/filings/{company}/latest` | Locate the latest filing |
//! | `GET`  | `/companies?q=&limit=` | Search EDGAR companies |
//! | `POST` | `/comparisons` | Compare insights across documents |
//! | `GET`  | `/cache/stats` | Response cache statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document 42 not found" } }
//! ```
//!
//! `code` is [`PipelineError::code`]; the HTTP status follows the error kind.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::CacheStats;
use crate::categories::Category;
use crate::compare::Comparison;
use crate::error::PipelineError;
use crate::extract::{CompanyMatch, FilingLocator};
use crate::jobs::CancelOutcome;
use crate::ledger::UsageSummary;
use crate::models::{
    DocumentMetadata, DocumentRef, InsightRecord, JobStatus, ProcessingJob, ProcessingOptions,
    SourceKind,
};
use crate::pipeline::{Pipeline, Submission};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Serve the API on `bind` until the process ends.
pub async fn run_server(bind: &str, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let app = router(pipeline);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("API listening on http://{}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}

/// The API routes, without binding a socket.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents", post(handle_submit))
        .route("/documents/{id}/status", get(handle_status))
        .route("/documents/{id}/cancel", post(handle_cancel))
        .route(
            "/documents/{id}/regenerate/{category}",
            post(handle_regenerate),
        )
        .route("/documents/{id}/insights", get(handle_insights))
        .route("/usage", get(handle_usage))
        .route("/filings/{company}/latest", get(handle_latest_filing))
        .route("/companies", get(handle_company_search))
        .route("/comparisons", post(handle_compare))
        .route("/cache/stats", get(handle_cache_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { pipeline })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::NotFound(_) | PipelineError::FilingNotFound { .. } => StatusCode::NOT_FOUND,
        PipelineError::InvalidSource(_)
        | PipelineError::UnknownCategory(_)
        | PipelineError::Comparison(_) => StatusCode::BAD_REQUEST,
        PipelineError::Extraction(_) | PipelineError::InsufficientContent { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::BackendCallFailed { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
        PipelineError::Cache(_) | PipelineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /documents ============

/// Body of `POST /documents`.
#[derive(Debug, Deserialize)]
struct SubmitRequest {
    source: SourceKind,
    locator: String,
    #[serde(default)]
    options: ProcessingOptions,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    company_name: Option<String>,
}

impl SubmitRequest {
    fn into_document(self) -> Result<DocumentRef, AppError> {
        if self.locator.trim().is_empty() {
            return Err(bad_request("locator must not be empty"));
        }
        Ok(
            DocumentRef::new(self.source, self.locator, self.options).with_metadata(
                DocumentMetadata {
                    title: self.title,
                    company_name: self.company_name,
                    filing_id: None,
                },
            ),
        )
    }
}

async fn handle_submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let doc = request.into_document()?;
    let submission = state.pipeline.submit(doc).await?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

// ============ Document operations ============

async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProcessingJob>, AppError> {
    Ok(Json(state.pipeline.status(&id).await?))
}

#[derive(Serialize)]
struct CancelResponse {
    outcome: &'static str,
    status: JobStatus,
}

fn cancel_response(outcome: CancelOutcome) -> CancelResponse {
    match outcome {
        CancelOutcome::Cancelled => CancelResponse {
            outcome: "cancelled",
            status: JobStatus::Cancelled,
        },
        CancelOutcome::AlreadyCancelled => CancelResponse {
            outcome: "already_cancelled",
            status: JobStatus::Cancelled,
        },
        CancelOutcome::Rejected(status) => CancelResponse {
            outcome: "rejected",
            status,
        },
    }
}

async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let outcome = state.pipeline.cancel(&id).await?;
    Ok(Json(cancel_response(outcome)))
}

async fn handle_regenerate(
    State(state): State<AppState>,
    Path((id, category)): Path<(String, String)>,
) -> Result<Json<InsightRecord>, AppError> {
    let category: Category = category.parse()?;
    Ok(Json(state.pipeline.regenerate(&id, category).await?))
}

#[derive(Serialize)]
struct InsightsResponse {
    document_id: String,
    insights: Vec<InsightRecord>,
}

async fn handle_insights(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InsightsResponse>, AppError> {
    let insights = state.pipeline.insights(&id).await?;
    Ok(Json(InsightsResponse {
        document_id: id,
        insights,
    }))
}

// ============ POST /comparisons ============

/// Body of `POST /comparisons`.
#[derive(Debug, Deserialize)]
struct CompareRequest {
    document_ids: Vec<String>,
}

async fn handle_compare(
    State(state): State<AppState>,
    Json(request): Json<CompareRequest>,
) -> Result<Json<Comparison>, AppError> {
    Ok(Json(state.pipeline.compare(&request.document_ids).await?))
}

// ============ Usage, filings, cache ============

async fn handle_usage(State(state): State<AppState>) -> Result<Json<UsageSummary>, AppError> {
    Ok(Json(state.pipeline.usage_summary().await?))
}

async fn handle_latest_filing(
    State(state): State<AppState>,
    Path(company): Path<String>,
) -> Result<Json<FilingLocator>, AppError> {
    Ok(Json(state.pipeline.resolve_latest_filing(&company).await?))
}

#[derive(Debug, Deserialize)]
struct CompanySearch {
    q: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    10
}

async fn handle_company_search(
    State(state): State<AppState>,
    Query(search): Query<CompanySearch>,
) -> Result<Json<Vec<CompanyMatch>>, AppError> {
    if search.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    Ok(Json(
        state
            .pipeline
            .search_companies(&search.q, search.limit.clamp(1, 100))
            .await?,
    ))
}

async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.pipeline.cache_stats().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(
            status_for(&PipelineError::NotFound("document x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&PipelineError::UnknownCategory("vibes".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&PipelineError::InsufficientContent {
                url: "u".into(),
                chars: 10,
                required: 500
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn submit_body_parses_with_defaults() {
        let request: SubmitRequest =
            serde_json::from_str(r#"{"source":"url","locator":"https://example.com/report"}"#)
                .unwrap();
        let doc = request.into_document().ok().unwrap();
        assert_eq!(doc.source_kind, SourceKind::Url);
        assert!(!doc.options.demo_mode);
    }

    #[test]
    fn empty_locator_rejected() {
        let request: SubmitRequest =
            serde_json::from_str(r#"{"source":"filing","locator":"  "}"#).unwrap();
        assert!(request.into_document().is_err());
    }

    #[test]
    fn comparison_errors_are_client_errors() {
        let err = PipelineError::Comparison("select at least 2 documents to compare".into());
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_comparison");
    }

    #[test]
    fn company_search_limit_defaults() {
        let search: CompanySearch = serde_json::from_str(r#"{"q":"apple"}"#).unwrap();
        assert_eq!(search.limit, 10);
    }

    #[test]
    fn rejected_cancel_reports_current_status() {
        let response = cancel_response(CancelOutcome::Rejected(JobStatus::Completed));
        assert_eq!(response.outcome, "rejected");
        assert_eq!(response.status, JobStatus::Completed);
    }
}
