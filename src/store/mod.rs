//! Storage abstraction for documents, insights, jobs and usage events.
//!
//! The [`Store`] trait is the only way the pipeline touches persistent state.
//! Two implementations exist:
//! - [`SqliteStore`] backed by an sqlx pool
//! - [`InMemoryStore`] for tests and throwaway runs
//!
//! Insights and jobs are upserted; usage events are append-only.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{DocumentRef, InsightRecord, ProcessingJob, UsageEvent};

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or replace a document ref |
/// | [`mark_processed`](Store::mark_processed) | Flag a document as done |
/// | [`upsert_insight`](Store::upsert_insight) | One row per (document, category) |
/// | [`upsert_job`](Store::upsert_job) | One job per document |
/// | [`append_usage`](Store::append_usage) | Append a usage event |
/// | [`usage_since`](Store::usage_since) | Usage events at or after a time |
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_document(&self, doc: &DocumentRef) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRef>>;

    async fn mark_processed(&self, id: &str) -> Result<()>;

    /// Replaces any existing insight for the same (document, category).
    async fn upsert_insight(&self, insight: &InsightRecord) -> Result<()>;

    /// Insights for a document, ordered by category key.
    async fn get_insights(&self, document_id: &str) -> Result<Vec<InsightRecord>>;

    async fn upsert_job(&self, job: &ProcessingJob) -> Result<()>;

    /// The job for a document, if one was ever created.
    async fn get_job(&self, document_id: &str) -> Result<Option<ProcessingJob>>;

    async fn append_usage(&self, event: &UsageEvent) -> Result<()>;

    /// Events with `timestamp >= since`, oldest first.
    async fn usage_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>>;
}
