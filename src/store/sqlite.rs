//! SQLite-backed [`Store`].
//!
//! Timestamps are stored as Unix milliseconds. Processing options are stored
//! as a JSON column since they are only ever read back whole.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::Store;
use crate::categories::Category;
use crate::config::Config;
use crate::models::{
    DocumentMetadata, DocumentRef, InsightRecord, JobStatus, ProcessingJob, Severity, SourceKind,
    UsageEvent,
};
use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentRef> {
    let kind: String = row.try_get("source_kind")?;
    let options_json: String = row.try_get("options_json")?;
    Ok(DocumentRef {
        id: row.try_get("id")?,
        source_kind: kind.parse::<SourceKind>().map_err(anyhow::Error::msg)?,
        locator: row.try_get("locator")?,
        options: serde_json::from_str(&options_json).context("Invalid options_json")?,
        metadata: DocumentMetadata {
            title: row.try_get("title")?,
            company_name: row.try_get("company_name")?,
            filing_id: row.try_get("filing_id")?,
        },
        processed: row.try_get::<i64, _>("processed")? != 0,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn insight_from_row(row: &SqliteRow) -> Result<InsightRecord> {
    let category: String = row.try_get("category")?;
    let severity: Option<String> = row.try_get("severity")?;
    Ok(InsightRecord {
        document_id: row.try_get("document_id")?,
        category: category.parse::<Category>()?,
        content: row.try_get("content")?,
        severity: severity.and_then(|s| s.parse::<Severity>().ok()),
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn job_from_row(row: &SqliteRow) -> Result<ProcessingJob> {
    let status: String = row.try_get("status")?;
    let started_at: Option<i64> = row.try_get("started_at")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;
    Ok(ProcessingJob {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        status: status.parse::<JobStatus>().map_err(anyhow::Error::msg)?,
        error: row.try_get("error")?,
        started_at: started_at.map(from_millis),
        completed_at: completed_at.map(from_millis),
    })
}

fn usage_from_row(row: &SqliteRow) -> Result<UsageEvent> {
    Ok(UsageEvent {
        backend: row.try_get("backend")?,
        prompt_tokens: row.try_get::<i64, _>("prompt_tokens")? as u32,
        completion_tokens: row.try_get::<i64, _>("completion_tokens")? as u32,
        estimated_cost: row.try_get("estimated_cost")?,
        success: row.try_get::<i64, _>("success")? != 0,
        error: row.try_get("error")?,
        timestamp: from_millis(row.try_get("timestamp")?),
        document_id: row.try_get("document_id")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &DocumentRef) -> Result<()> {
        let options_json = serde_json::to_string(&doc.options)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, source_kind, locator, options_json, title, company_name, filing_id, processed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                locator = excluded.locator,
                options_json = excluded.options_json,
                title = excluded.title,
                company_name = excluded.company_name,
                filing_id = excluded.filing_id,
                processed = excluded.processed
            "#,
        )
        .bind(&doc.id)
        .bind(doc.source_kind.as_str())
        .bind(&doc.locator)
        .bind(&options_json)
        .bind(&doc.metadata.title)
        .bind(&doc.metadata.company_name)
        .bind(&doc.metadata.filing_id)
        .bind(doc.processed as i64)
        .bind(to_millis(doc.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRef>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn mark_processed(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET processed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_insight(&self, insight: &InsightRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO insights (document_id, category, content, severity, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(document_id, category) DO UPDATE SET
                content = excluded.content,
                severity = excluded.severity,
                created_at = excluded.created_at
            "#,
        )
        .bind(&insight.document_id)
        .bind(insight.category.key())
        .bind(&insight.content)
        .bind(insight.severity.map(|s| s.as_str()))
        .bind(to_millis(insight.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_insights(&self, document_id: &str) -> Result<Vec<InsightRecord>> {
        let rows = sqlx::query("SELECT * FROM insights WHERE document_id = ? ORDER BY category")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(insight_from_row).collect()
    }

    async fn upsert_job(&self, job: &ProcessingJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_jobs (id, document_id, status, error, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                id = excluded.id,
                status = excluded.status,
                error = excluded.error,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.document_id)
        .bind(job.status.as_str())
        .bind(&job.error)
        .bind(job.started_at.map(to_millis))
        .bind(job.completed_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, document_id: &str) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query("SELECT * FROM processing_jobs WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn append_usage(&self, event: &UsageEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_events (backend, prompt_tokens, completion_tokens, estimated_cost, success, error, timestamp, document_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.backend)
        .bind(event.prompt_tokens as i64)
        .bind(event.completion_tokens as i64)
        .bind(event.estimated_cost)
        .bind(event.success as i64)
        .bind(&event.error)
        .bind(to_millis(event.timestamp))
        .bind(&event.document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn usage_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM usage_events WHERE timestamp >= ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(usage_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessingOptions;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("lens.sqlite"));
        let store = SqliteStore::open(&config).await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn document_round_trips_options_and_metadata() {
        let (_tmp, store) = open_temp().await;
        let options = ProcessingOptions {
            persona_lens: Some("value".to_string()),
            ..Default::default()
        };
        let doc = DocumentRef::new(SourceKind::Filing, "AAPL", options).with_metadata(
            DocumentMetadata {
                title: Some("Annual report".to_string()),
                company_name: Some("Apple Inc.".to_string()),
                filing_id: None,
            },
        );
        store.upsert_document(&doc).await.unwrap();

        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.source_kind, SourceKind::Filing);
        assert_eq!(loaded.options.persona_lens.as_deref(), Some("value"));
        assert_eq!(loaded.metadata.company_name.as_deref(), Some("Apple Inc."));
        assert!(!loaded.processed);
    }

    #[tokio::test]
    async fn insight_unique_per_document_and_category() {
        let (_tmp, store) = open_temp().await;
        let doc = DocumentRef::new(SourceKind::Url, "https://example.com", ProcessingOptions::default());
        store.upsert_document(&doc).await.unwrap();

        for content in ["first", "second"] {
            store
                .upsert_insight(&InsightRecord {
                    document_id: doc.id.clone(),
                    category: Category::RedFlags,
                    content: content.to_string(),
                    severity: Some(Severity::High),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let insights = store.get_insights(&doc.id).await.unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].content, "second");
        assert_eq!(insights[0].severity, Some(Severity::High));
    }

    #[tokio::test]
    async fn job_upsert_keeps_one_row_per_document() {
        let (_tmp, store) = open_temp().await;
        let mut job = ProcessingJob {
            id: "job-1".to_string(),
            document_id: "doc-1".to_string(),
            status: JobStatus::Pending,
            error: None,
            started_at: None,
            completed_at: None,
        };
        store.upsert_job(&job).await.unwrap();
        job.status = JobStatus::Failed;
        job.error = Some("boom".to_string());
        store.upsert_job(&job).await.unwrap();

        let loaded = store.get_job("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn usage_since_filters_by_time() {
        let (_tmp, store) = open_temp().await;
        let now = Utc::now();
        for (backend, age_days) in [("old", 40), ("new", 0)] {
            store
                .append_usage(&UsageEvent {
                    backend: backend.to_string(),
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    estimated_cost: 0.01,
                    success: true,
                    error: None,
                    timestamp: now - chrono::Duration::days(age_days),
                    document_id: None,
                })
                .await
                .unwrap();
        }

        let recent = store
            .usage_since(now - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].backend, "new");
    }
}
