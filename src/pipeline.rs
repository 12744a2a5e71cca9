//! The document pipeline: submission, background processing and the
//! operations callers use while a job runs.
//!
//! ```text
//! submit ─▶ resolve source ─▶ extract ─▶ budget ─▶ orchestrate ─▶ persist
//!             └──────────── job state wraps the whole run ────────────┘
//! ```
//!
//! At most one job per document is in flight; a second submission while
//! one runs returns the running job. Cancellation is cooperative: it flips
//! the job state and the run discards its results when it finishes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendSet, CompletionRequest, RetryPolicy};
use crate::budget::{BudgetContext, ContentBudgeter};
use crate::cache::{CacheStats, ResponseCache};
use crate::categories::{select_categories, Category};
use crate::compare::{
    self, ComparedDocument, Comparison, ALL_COMPARISONS, COMPARISON_SYSTEM_PROMPT,
};
use crate::config::Config;
use crate::error::PipelineError;
use crate::extract::{CompanyMatch, Extractors, FilingLocator};
use crate::fetch::HttpFetcher;
use crate::jobs::CancelOutcome;
use crate::ledger::{UsageLedger, UsageSummary};
use crate::models::{
    DocumentMetadata, DocumentRef, InsightRecord, ProcessingJob, Severity, SourceKind,
};
use crate::orchestrator::{GenerationReport, LabeledPrompt, Mode, Orchestrator};
use crate::source;
use crate::store::Store;

/// Extractions shorter than this abort the job.
pub const MIN_CONTENT_CHARS: usize = 100;

/// Returned by [`Pipeline::submit`].
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub document_id: String,
    pub job_id: String,
    /// True when a job for this document was already running.
    pub already_running: bool,
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    extractors: Extractors,
    budgeter: ContentBudgeter,
    orchestrator: Orchestrator,
    cache: Arc<ResponseCache>,
    ledger: Arc<UsageLedger>,
    cache_max_age_days: u32,
    upload_dir: PathBuf,
    in_flight: StdMutex<HashSet<String>>,
    /// Serializes job state transitions.
    transitions: Mutex<()>,
}

impl Pipeline {
    /// Wire a pipeline from configuration with real HTTP fetchers and the
    /// configured backends.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let timeout = std::time::Duration::from_secs(config.extraction.fetch_timeout_secs);
        let extractors = Extractors::new(
            Arc::new(HttpFetcher::browser(timeout)?),
            Arc::new(HttpFetcher::sec(&config.extraction.sec_user_agent, timeout)?),
            config.extraction.clone(),
        );
        let backends = BackendSet::from_config(&config.backends);
        Ok(Self::new(config, store, extractors, backends))
    }

    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        extractors: Extractors,
        backends: BackendSet,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let ledger = Arc::new(UsageLedger::new(store.clone(), config.budget.monthly_usd));
        let orchestrator = Orchestrator::new(
            backends,
            cache.clone(),
            ledger.clone(),
            RetryPolicy::from_config(&config.backends),
            config.backends.concurrency,
        );
        Self {
            store,
            extractors,
            budgeter: ContentBudgeter::new(config.budgeter.max_input_tokens),
            orchestrator,
            cache,
            ledger,
            cache_max_age_days: config.cache.max_age_days,
            upload_dir: config.storage.upload_dir.clone(),
            in_flight: StdMutex::new(HashSet::new()),
            transitions: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True while a background run for `document_id` is in progress.
    pub fn is_running(&self, document_id: &str) -> bool {
        self.in_flight().contains(document_id)
    }

    /// Persist `doc`, create its job and start processing in the background.
    ///
    /// Returns as soon as the job is recorded; poll [`status`](Self::status).
    /// Local files are copied into the upload directory first, so later
    /// regenerations do not depend on the caller's copy.
    pub async fn submit(self: &Arc<Self>, mut doc: DocumentRef) -> Result<Submission, PipelineError> {
        let claimed = self.in_flight().insert(doc.id.clone());
        if !claimed {
            let job = self
                .store
                .get_job(&doc.id)
                .await?
                .ok_or_else(|| PipelineError::NotFound(format!("job for document {}", doc.id)))?;
            info!(document_id = %doc.id, job_id = %job.id, "Job already in flight");
            return Ok(Submission {
                document_id: doc.id,
                job_id: job.id,
                already_running: true,
            });
        }

        let job = ProcessingJob::new(&doc.id);
        let recorded = async {
            self.stage_upload(&mut doc).await?;
            self.store.upsert_document(&doc).await?;
            self.store.upsert_job(&job).await
        }
        .await;
        if let Err(e) = recorded {
            self.in_flight().remove(&doc.id);
            return Err(e.into());
        }

        info!(
            document_id = %doc.id,
            job_id = %job.id,
            source = doc.source_kind.as_str(),
            locator = %doc.locator,
            "Submitted document"
        );

        let pipeline = Arc::clone(self);
        let document_id = doc.id.clone();
        tokio::spawn(async move { pipeline.run_job(document_id).await });

        Ok(Submission {
            document_id: doc.id,
            job_id: job.id,
            already_running: false,
        })
    }

    /// Process one document to a terminal state. Releases the in-flight
    /// claim when done.
    pub async fn run_job(self: Arc<Self>, document_id: String) {
        if let Err(e) = self.process(&document_id).await {
            error!(document_id = %document_id, error = %e, "Job bookkeeping failed");
        }
        self.in_flight().remove(&document_id);
    }

    /// Copy an existing local file to `<upload_dir>/<document id>/<name>`
    /// and point the document at the copy. Missing paths are left for
    /// extraction to report.
    async fn stage_upload(&self, doc: &mut DocumentRef) -> anyhow::Result<()> {
        if doc.source_kind != SourceKind::File {
            return Ok(());
        }
        let original = PathBuf::from(&doc.locator);
        let is_file = tokio::fs::metadata(&original)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file || original.starts_with(&self.upload_dir) {
            return Ok(());
        }

        let name = original
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "upload".into());
        let dir = self.upload_dir.join(&doc.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating upload directory {}", dir.display()))?;
        let staged = dir.join(name);
        tokio::fs::copy(&original, &staged).await.with_context(|| {
            format!("copying {} to {}", original.display(), staged.display())
        })?;
        debug!(document_id = %doc.id, from = %original.display(), to = %staged.display(), "Staged upload");
        doc.locator = path_string(&staged);
        Ok(())
    }

    async fn process(&self, document_id: &str) -> Result<(), PipelineError> {
        {
            let _guard = self.transitions.lock().await;
            let mut job = self.job(document_id).await?;
            if let Err(e) = job.start() {
                info!(document_id, error = %e, "Job not startable, skipping");
                return Ok(());
            }
            self.store.upsert_job(&job).await?;
        }

        if let Err(e) = self.finish_run(document_id).await {
            warn!(document_id, error = %e, "Job failed");
            self.fail_job(document_id, &e).await?;
        }
        Ok(())
    }

    /// Everything after the job starts. Any error here fails the job.
    async fn finish_run(&self, document_id: &str) -> Result<(), PipelineError> {
        let mut doc = self.document(document_id).await?;
        let started = std::time::Instant::now();
        let (metadata, report) = self.produce(&doc).await?;

        let guard = self.transitions.lock().await;
        let mut job = self.job(document_id).await?;
        if job.status.is_terminal() {
            info!(document_id, status = %job.status, "Run finished after job ended, discarding results");
            return Ok(());
        }

        doc.metadata = metadata;
        doc.processed = true;
        self.store.upsert_document(&doc).await?;
        for record in records(document_id, &report) {
            self.store.upsert_insight(&record).await?;
        }
        if let Err(e) = job.complete() {
            warn!(document_id, error = %e, "Could not complete job");
        }
        self.store.upsert_job(&job).await?;
        info!(
            document_id,
            insights = report.insights.len(),
            placeholders = report.placeholders(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job completed"
        );
        drop(guard);
        self.cache.cleanup(self.cache_max_age_days).await;
        Ok(())
    }

    /// Record `cause` on the job unless it already reached a terminal state.
    async fn fail_job(&self, document_id: &str, cause: &PipelineError) -> Result<(), PipelineError> {
        let _guard = self.transitions.lock().await;
        let mut job = self.job(document_id).await?;
        if job.status.is_terminal() {
            info!(document_id, status = %job.status, "Job already ended, keeping its state");
            return Ok(());
        }
        if let Err(e) = job.fail(cause.to_string()) {
            warn!(document_id, error = %e, "Could not fail job");
        }
        self.store.upsert_job(&job).await?;
        Ok(())
    }

    /// Extract, budget and generate. Demo mode skips extraction.
    async fn produce(
        &self,
        doc: &DocumentRef,
    ) -> Result<(DocumentMetadata, GenerationReport), PipelineError> {
        let categories = select_categories(&doc.options);
        let (metadata, text) = self.prepare(doc).await?;
        let mode = Mode::for_document(&doc.options, &metadata);
        info!(document_id = %doc.id, ?mode, categories = categories.len(), "Generating insights");
        let report = self
            .orchestrator
            .generate(mode, &text, &categories, Some(&doc.id))
            .await;
        Ok((metadata, report))
    }

    /// Sniffed metadata and the text the orchestrator should see.
    async fn prepare(&self, doc: &DocumentRef) -> Result<(DocumentMetadata, String), PipelineError> {
        if !Mode::for_document(&doc.options, &doc.metadata).needs_content() {
            return Ok((source::sniff_metadata(doc, None), String::new()));
        }

        let strategy = source::resolve(doc)?;
        let (content, locator) = self.extractors.extract(&strategy).await?;
        let chars = content.char_count();
        if chars < MIN_CONTENT_CHARS {
            return Err(PipelineError::Extraction(format!(
                "only {} characters extracted, need at least {}",
                chars, MIN_CONTENT_CHARS
            )));
        }
        info!(
            document_id = %doc.id,
            chars,
            method = ?content.method,
            truncated = content.truncated,
            "Extracted content"
        );

        let mut metadata = source::sniff_metadata(doc, content.source_title.as_deref());
        if let Some(locator) = &locator {
            apply_filing(&mut metadata, locator);
        }

        let text = match Mode::for_document(&doc.options, &metadata) {
            Mode::Backends => {
                let used_percent = match self.ledger.budget_status().await {
                    Ok(status) => status.used_percent,
                    Err(e) => {
                        warn!(error = %e, "Could not read budget status");
                        0.0
                    }
                };
                let fitted = self
                    .budgeter
                    .fit(
                        &content.text,
                        BudgetContext {
                            used_percent,
                            summarizer: self.orchestrator.backends().summarizer.as_deref(),
                            ledger: &self.ledger,
                            document_id: Some(&doc.id),
                        },
                    )
                    .await;
                info!(document_id = %doc.id, strategy = ?fitted.strategy, "Content budgeted");
                fitted.text
            }
            _ => content.text,
        };
        Ok((metadata, text))
    }

    async fn job(&self, document_id: &str) -> Result<ProcessingJob, PipelineError> {
        self.store
            .get_job(document_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job for document {}", document_id)))
    }

    async fn document(&self, document_id: &str) -> Result<DocumentRef, PipelineError> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("document {}", document_id)))
    }

    pub async fn status(&self, document_id: &str) -> Result<ProcessingJob, PipelineError> {
        self.job(document_id).await
    }

    /// Cancel a pending or processing job. Terminal jobs are left alone.
    pub async fn cancel(&self, document_id: &str) -> Result<CancelOutcome, PipelineError> {
        let _guard = self.transitions.lock().await;
        let mut job = self.job(document_id).await?;
        let outcome = job.cancel();
        match outcome {
            CancelOutcome::Cancelled => {
                self.store.upsert_job(&job).await?;
                self.store.mark_processed(document_id).await?;
                info!(document_id, "Job cancelled");
            }
            CancelOutcome::AlreadyCancelled => info!(document_id, "Job already cancelled"),
            CancelOutcome::Rejected(status) => {
                info!(document_id, status = %status, "Cancel rejected for finished job")
            }
        }
        Ok(outcome)
    }

    /// Regenerate a single category and upsert it. A placeholder result is
    /// returned but does not replace an existing insight.
    pub async fn regenerate(
        &self,
        document_id: &str,
        category: Category,
    ) -> Result<InsightRecord, PipelineError> {
        let doc = self.document(document_id).await?;
        let (metadata, text) = self.prepare(&doc).await?;
        let mode = Mode::for_document(&doc.options, &metadata);
        let report = self
            .orchestrator
            .regenerate(mode, &text, category, Some(document_id))
            .await;

        let placeholder = report
            .provenance
            .get(&category)
            .is_some_and(|p| p.is_placeholder());
        let record = records(document_id, &report)
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::NotFound(format!("insight {}", category)))?;

        if placeholder {
            warn!(document_id, category = %category, "Regeneration produced a placeholder");
        } else {
            self.store.upsert_insight(&record).await?;
            info!(document_id, category = %category, "Insight regenerated");
        }
        Ok(record)
    }

    pub async fn insights(&self, document_id: &str) -> Result<Vec<InsightRecord>, PipelineError> {
        self.document(document_id).await?;
        Ok(self.store.get_insights(document_id).await?)
    }

    /// Compare the stored insights of two or more documents, oldest first.
    ///
    /// Every document must exist and already have insights. Needs a
    /// configured backend; failed categories come back as placeholders.
    pub async fn compare(&self, document_ids: &[String]) -> Result<Comparison, PipelineError> {
        let ids = compare::validate_ids(document_ids)?;
        if !self.orchestrator.has_backend() {
            return Err(PipelineError::BackendUnavailable {
                backend: "any".to_string(),
                reason: "comparisons need a primary or secondary backend".to_string(),
            });
        }

        let mut documents = Vec::with_capacity(ids.len());
        for id in &ids {
            let doc = self.document(id).await?;
            let insights = self.store.get_insights(id).await?;
            if insights.is_empty() {
                return Err(PipelineError::Comparison(format!(
                    "document '{}' has no insights to compare",
                    compare::document_label(&doc)
                )));
            }
            documents.push(ComparedDocument::new(&doc, &insights));
        }
        documents.sort_by_key(|d| d.date);

        let block = compare::format_documents(&documents);
        let prompts = ALL_COMPARISONS
            .iter()
            .map(|&category| LabeledPrompt {
                key: category,
                label: category.display_name(),
                request: CompletionRequest::new(category.render_prompt(&block))
                    .with_system(COMPARISON_SYSTEM_PROMPT),
            })
            .collect();
        let generated = self.orchestrator.complete_batch(prompts, None).await;
        let comparison = Comparison::new(documents, generated);
        info!(
            documents = comparison.documents.len(),
            placeholders = comparison.placeholders(),
            "Comparison finished"
        );
        Ok(comparison)
    }

    pub async fn usage_summary(&self) -> Result<UsageSummary, PipelineError> {
        Ok(self.ledger.summary().await?)
    }

    pub async fn resolve_latest_filing(&self, company: &str) -> Result<FilingLocator, PipelineError> {
        self.extractors.resolve_latest_filing(company).await
    }

    pub async fn search_companies(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CompanyMatch>, PipelineError> {
        self.extractors.search_company(query, limit).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn cleanup_cache(&self, max_age_days: Option<u32>) -> usize {
        self.cache
            .cleanup(max_age_days.unwrap_or(self.cache_max_age_days))
            .await
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn apply_filing(metadata: &mut DocumentMetadata, locator: &FilingLocator) {
    metadata.filing_id = Some(locator.accession.clone());
    let unknown = metadata
        .company_name
        .as_deref()
        .map_or(true, |c| c == source::UNKNOWN_COMPANY);
    if unknown {
        if let Some(name) = &locator.company_name {
            metadata.company_name = Some(name.clone());
        }
    }
}

/// Insight rows for a report; red flags carry a severity.
fn records(document_id: &str, report: &GenerationReport) -> Vec<InsightRecord> {
    let now = Utc::now();
    report
        .insights
        .iter()
        .map(|(&category, content)| InsightRecord {
            document_id: document_id.to_string(),
            category,
            content: content.clone(),
            severity: if category == Category::RedFlags {
                Severity::detect(content)
            } else {
                None
            },
            created_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn filing_fills_unknown_company_and_accession() {
        let mut metadata = DocumentMetadata {
            title: Some("t".to_string()),
            company_name: Some(source::UNKNOWN_COMPANY.to_string()),
            filing_id: None,
        };
        let locator = FilingLocator {
            cik: "320193".to_string(),
            company_name: Some("Apple Inc.".to_string()),
            form: "10-K".to_string(),
            accession: "0000320193-23-000106".to_string(),
            filing_date: None,
            document_url: Url::parse("https://www.sec.gov/x.htm").unwrap(),
        };
        apply_filing(&mut metadata, &locator);
        assert_eq!(metadata.company_name.as_deref(), Some("Apple Inc."));
        assert_eq!(metadata.filing_id.as_deref(), Some("0000320193-23-000106"));
    }

    #[test]
    fn red_flag_records_get_severity() {
        let mut report = GenerationReport::default();
        report
            .insights
            .insert(Category::RedFlags, "<li>Severity: High</li>".to_string());
        report
            .insights
            .insert(Category::Moat, "Severity: High".to_string());
        let rows = records("doc", &report);
        let red = rows.iter().find(|r| r.category == Category::RedFlags).unwrap();
        let moat = rows.iter().find(|r| r.category == Category::Moat).unwrap();
        assert_eq!(red.severity, Some(Severity::High));
        assert_eq!(moat.severity, None);
    }
}
