//! Insight orchestrator: turns budgeted content into one insight per
//! requested category.
//!
//! # Modes
//!
//! - **Demo**: curated sector templates, no extraction and no backend calls.
//! - **Local**: rule-based keyword analysis, no backend calls.
//! - **Backends**: cache first, then the primary backend per category with
//!   retries, falling over to the secondary for that category alone.
//!
//! # Guarantees
//!
//! Every requested category is present in the result. A category that
//! cannot be generated carries a readable placeholder; placeholders are
//! never cached. The ledger is read before every paid attempt, retries
//! included, and a paid call is refused once monthly spend reaches the
//! gate. Refused calls record no usage. Attempts already in flight when
//! spend crosses the gate still complete.
//!
//! # Caching
//!
//! Cache entries are keyed by content and the primary backend's name (the
//! secondary's when no primary is configured). A category that fell over
//! to the secondary is stored in the same entry, so a later run serves it
//! from the cache without knowing which backend wrote it.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendSet, CompletionRequest, RetryPolicy};
use crate::budget::PAID_CALL_GATE_PERCENT;
use crate::cache::{InsightMap, ResponseCache};
use crate::categories::Category;
use crate::demo::{self, Sector};
use crate::error::{BackendError, PipelineError};
use crate::ledger::UsageLedger;
use crate::local;
use crate::models::{DocumentMetadata, ProcessingOptions};

pub const SYSTEM_PROMPT: &str =
    "You are an assistant that analyzes company documents through the lens of value investing.";

/// How insights are produced for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Demo(Sector),
    Local,
    Backends,
}

impl Mode {
    /// Demo wins over local when both are requested.
    pub fn for_document(options: &ProcessingOptions, metadata: &DocumentMetadata) -> Mode {
        if options.demo_mode {
            Mode::Demo(demo::classify_sector(
                metadata.title.as_deref(),
                metadata.company_name.as_deref(),
            ))
        } else if options.local_only {
            Mode::Local
        } else {
            Mode::Backends
        }
    }

    /// Whether this mode reads document text.
    pub fn needs_content(&self) -> bool {
        !matches!(self, Mode::Demo(_))
    }
}

/// Where one category's content came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Provenance {
    Template,
    Rules,
    Cache,
    Backend(String),
    /// Budget gate refused every usable backend.
    BudgetPlaceholder,
    /// Every backend failed or none is configured.
    FailurePlaceholder,
}

impl Provenance {
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            Provenance::BudgetPlaceholder | Provenance::FailurePlaceholder
        )
    }
}

/// Text for one prompt: generated content or a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub provenance: Provenance,
}

impl Generated {
    fn placeholder(text: String, provenance: Provenance) -> Self {
        Self { text, provenance }
    }
}

/// A prompt with the key its result is filed under and a readable label
/// for placeholders and logs.
pub struct LabeledPrompt<K> {
    pub key: K,
    pub label: &'static str,
    pub request: CompletionRequest,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub insights: InsightMap,
    pub provenance: BTreeMap<Category, Provenance>,
}

impl GenerationReport {
    fn insert(&mut self, category: Category, content: String, provenance: Provenance) {
        self.insights.insert(category, content);
        self.provenance.insert(category, provenance);
    }

    pub fn placeholders(&self) -> usize {
        self.provenance.values().filter(|p| p.is_placeholder()).count()
    }
}

/// Why one backend produced no text.
#[derive(Debug)]
enum CallFailure {
    BudgetRefused { used_percent: f64 },
    Backend(BackendError),
}

pub struct Orchestrator {
    backends: BackendSet,
    cache: Arc<ResponseCache>,
    ledger: Arc<UsageLedger>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        backends: BackendSet,
        cache: Arc<ResponseCache>,
        ledger: Arc<UsageLedger>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            backends,
            cache,
            ledger,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// True when a primary or secondary backend is configured.
    pub fn has_backend(&self) -> bool {
        self.cache_backend_name().is_some()
    }

    /// Backend name used in cache keys: primary, else secondary.
    fn cache_backend_name(&self) -> Option<&str> {
        self.backends
            .primary
            .as_deref()
            .or(self.backends.secondary.as_deref())
            .map(|b| b.name())
    }

    /// Generate every category in `categories`.
    pub async fn generate(
        &self,
        mode: Mode,
        content: &str,
        categories: &[Category],
        document_id: Option<&str>,
    ) -> GenerationReport {
        self.run(mode, content, categories, &[], document_id).await
    }

    /// Generate one category, ignoring any cached content for it.
    pub async fn regenerate(
        &self,
        mode: Mode,
        content: &str,
        category: Category,
        document_id: Option<&str>,
    ) -> GenerationReport {
        self.run(mode, content, &[category], &[category], document_id)
            .await
    }

    async fn run(
        &self,
        mode: Mode,
        content: &str,
        categories: &[Category],
        bypass_cache: &[Category],
        document_id: Option<&str>,
    ) -> GenerationReport {
        let mut report = GenerationReport::default();
        match mode {
            Mode::Demo(sector) => {
                for (category, text) in demo::demo_insights(sector, categories) {
                    report.insert(category, text, Provenance::Template);
                }
            }
            Mode::Local => {
                for (category, text) in local::local_insights(content, categories) {
                    report.insert(category, text, Provenance::Rules);
                }
            }
            Mode::Backends => {
                self.run_backends(content, categories, bypass_cache, document_id, &mut report)
                    .await
            }
        }
        report
    }

    async fn run_backends(
        &self,
        content: &str,
        categories: &[Category],
        bypass_cache: &[Category],
        document_id: Option<&str>,
        report: &mut GenerationReport,
    ) {
        let Some(backend_name) = self.cache_backend_name() else {
            warn!("No usable text-generation backend configured");
            for &category in categories {
                let generated = no_backend_placeholder(category.display_name());
                report.insert(category, generated.text, generated.provenance);
            }
            return;
        };

        let key = self.cache.key(content, backend_name);
        let mut cached = self.cache.get(&key).await.unwrap_or_default();

        let mut missing = Vec::new();
        for &category in categories {
            match cached.get(&category) {
                Some(text) if !bypass_cache.contains(&category) => {
                    report.insert(category, text.clone(), Provenance::Cache);
                }
                _ => missing.push(category),
            }
        }
        if missing.is_empty() {
            info!(categories = categories.len(), "All categories served from cache");
            return;
        }
        debug!(missing = missing.len(), cached = categories.len() - missing.len(), "Generating");

        let prompts = missing
            .into_iter()
            .map(|category| LabeledPrompt {
                key: category,
                label: category.display_name(),
                request: CompletionRequest::new(category.render_prompt(content))
                    .with_system(SYSTEM_PROMPT),
            })
            .collect();

        let mut generated_count = 0usize;
        for (category, generated) in self.complete_batch(prompts, document_id).await {
            if let Provenance::Backend(_) = &generated.provenance {
                cached.insert(category, generated.text.clone());
                generated_count += 1;
            }
            report.insert(category, generated.text, generated.provenance);
        }

        if generated_count > 0 {
            self.cache.put(&key, &cached).await;
        }
        info!(
            generated = generated_count,
            placeholders = report.placeholders(),
            "Category generation finished"
        );
    }

    /// Run `prompts` concurrently through the backend chain. Results come
    /// back in completion order.
    pub async fn complete_batch<K: Send>(
        &self,
        prompts: Vec<LabeledPrompt<K>>,
        document_id: Option<&str>,
    ) -> Vec<(K, Generated)> {
        if !self.has_backend() {
            return prompts
                .into_iter()
                .map(|p| (p.key, no_backend_placeholder(p.label)))
                .collect();
        }
        stream::iter(prompts)
            .map(|prompt| async move {
                let generated = self
                    .complete_prompt(prompt.label, &prompt.request, document_id)
                    .await;
                (prompt.key, generated)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Primary, then secondary. The first success wins; otherwise a
    /// placeholder naming the last failure, or the budget refusal when
    /// nothing was attempted.
    pub async fn complete_prompt(
        &self,
        label: &str,
        request: &CompletionRequest,
        document_id: Option<&str>,
    ) -> Generated {
        let candidates = [self.backends.primary.as_ref(), self.backends.secondary.as_ref()];

        let mut last_error: Option<PipelineError> = None;
        let mut refused_at: Option<f64> = None;

        for backend in candidates.into_iter().flatten() {
            match self.call_with_retry(backend.as_ref(), request, document_id).await {
                Ok(text) => {
                    return Generated {
                        text,
                        provenance: Provenance::Backend(backend.name().to_string()),
                    }
                }
                Err(CallFailure::BudgetRefused { used_percent }) => {
                    warn!(label, backend = backend.name(), used_percent, "Budget gate closed for paid backend");
                    refused_at = Some(used_percent);
                }
                Err(CallFailure::Backend(e)) => {
                    warn!(label, backend = backend.name(), error = %e, "Prompt failed on backend");
                    last_error = Some(PipelineError::BackendCallFailed {
                        backend: backend.name().to_string(),
                        source: e,
                    });
                }
            }
        }

        match (last_error, refused_at) {
            (Some(e), _) => Generated::placeholder(
                failure_placeholder(label, &e.to_string()),
                Provenance::FailurePlaceholder,
            ),
            (None, Some(used_percent)) => Generated::placeholder(
                budget_placeholder(label, used_percent),
                Provenance::BudgetPlaceholder,
            ),
            (None, None) => no_backend_placeholder(label),
        }
    }

    /// Current spend; an unreadable ledger counts as nothing spent.
    async fn used_percent(&self) -> f64 {
        match self.ledger.budget_status().await {
            Ok(status) => status.used_percent,
            Err(e) => {
                warn!(error = %e, "Could not read budget status, assuming none spent");
                0.0
            }
        }
    }

    /// One backend, retrying retryable errors with doubling backoff. Every
    /// attempt is recorded in the ledger; paid attempts check spend first.
    async fn call_with_retry(
        &self,
        backend: &dyn Backend,
        request: &CompletionRequest,
        document_id: Option<&str>,
    ) -> Result<String, CallFailure> {
        let mut retry = 0;
        loop {
            if backend.is_paid() {
                let used_percent = self.used_percent().await;
                if used_percent >= PAID_CALL_GATE_PERCENT {
                    return Err(CallFailure::BudgetRefused { used_percent });
                }
            }

            let outcome = match tokio::time::timeout(backend.config().timeout, backend.complete(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(BackendError::Timeout),
            };
            let outcome = outcome.and_then(|c| {
                if c.text.trim().is_empty() {
                    Err(BackendError::BadResponse("empty completion".to_string()))
                } else {
                    Ok(c)
                }
            });

            if let Err(e) = self
                .ledger
                .record_call(backend.config(), request, &outcome, document_id)
                .await
            {
                warn!(error = %e, "Failed to record usage event");
            }

            match outcome {
                Ok(completion) => return Ok(completion.text.trim().to_string()),
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    debug!(backend = backend.name(), retry, ?delay, error = %e, "Retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(CallFailure::Backend(e)),
            }
        }
    }
}

const BUDGET_PLACEHOLDER_TAG: &str = "data-budget-exceeded";

fn failure_placeholder(label: &str, error: &str) -> String {
    format!(
        "<p>Unable to generate {} insight. Error: {}</p>",
        label,
        html_escape(error)
    )
}

fn no_backend_placeholder(label: &str) -> Generated {
    let reason = PipelineError::BackendUnavailable {
        backend: "any".to_string(),
        reason: "no primary or secondary backend could be built".to_string(),
    };
    Generated::placeholder(
        failure_placeholder(label, &reason.to_string()),
        Provenance::FailurePlaceholder,
    )
}

fn budget_placeholder(label: &str, used_percent: f64) -> String {
    format!(
        "<p {}>{} insight skipped: {}. Raise the monthly budget or configure a free backend.</p>",
        BUDGET_PLACEHOLDER_TAG,
        label,
        PipelineError::BudgetExceeded { used_percent }
    )
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, BackendKind, Completion, Rates};
    use crate::config::CacheConfig;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Scripted backend: per-category error queue, otherwise echoes.
    struct Scripted {
        config: BackendConfig,
        failures: Mutex<HashMap<&'static str, Vec<BackendError>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(name: &str, paid: bool) -> Self {
            Self {
                config: BackendConfig {
                    name: name.to_string(),
                    kind: BackendKind::Ollama,
                    model: "m".to_string(),
                    url: None,
                    api_key: None,
                    timeout: Duration::from_secs(15),
                    max_tokens: 100,
                    temperature: 0.5,
                    rates: if paid {
                        Rates {
                            prompt_per_1k: 1.0,
                            completion_per_1k: 1.0,
                        }
                    } else {
                        Rates::FREE
                    },
                },
                failures: Mutex::new(HashMap::new()),
                calls: Mutex::new(0),
            }
        }

        fn fail(self, marker: &'static str, errors: Vec<BackendError>) -> Self {
            self.failures.lock().unwrap().insert(marker, errors);
            self
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Backend for Scripted {
        fn config(&self) -> &BackendConfig {
            &self.config
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            for (marker, errors) in failures.iter_mut() {
                if request.prompt.contains(marker) && !errors.is_empty() {
                    return Err(errors.remove(0));
                }
            }
            Ok(Completion {
                text: format!("<p>from {}</p>", self.config.name),
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
            })
        }
    }

    struct Harness {
        _dir: TempDir,
        cache: Arc<ResponseCache>,
        ledger: Arc<UsageLedger>,
    }

    fn harness(budget: f64) -> Harness {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ResponseCache::new(&CacheConfig {
            dir: dir.path().join("cache"),
            ..CacheConfig::default()
        }));
        let ledger = Arc::new(UsageLedger::new(Arc::new(InMemoryStore::new()), budget));
        Harness {
            _dir: dir,
            cache,
            ledger,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn orchestrator(h: &Harness, primary: Arc<Scripted>, secondary: Option<Arc<Scripted>>) -> Orchestrator {
        let backends = BackendSet {
            primary: Some(primary),
            secondary: secondary.map(|s| s as Arc<dyn Backend>),
            summarizer: None,
        };
        Orchestrator::new(backends, h.cache.clone(), h.ledger.clone(), fast_retry(), 4)
    }

    #[tokio::test]
    async fn retryable_error_is_retried_on_same_backend() {
        let h = harness(100.0);
        let primary = Arc::new(
            Scripted::new("primary", false).fail("forensic", vec![BackendError::Timeout]),
        );
        let orch = orchestrator(&h, primary.clone(), None);
        let report = orch
            .generate(Mode::Backends, "doc text", &[Category::RedFlags], None)
            .await;
        assert_eq!(
            report.provenance[&Category::RedFlags],
            Provenance::Backend("primary".to_string())
        );
        assert_eq!(primary.calls(), 2);
        assert_eq!(h.ledger.summary().await.unwrap().total_requests, 2);
    }

    #[tokio::test]
    async fn auth_error_is_not_retried() {
        let h = harness(100.0);
        let primary = Arc::new(
            Scripted::new("primary", false)
                .fail("forensic", vec![BackendError::Auth("bad key".to_string())]),
        );
        let orch = orchestrator(&h, primary.clone(), None);
        let report = orch
            .generate(Mode::Backends, "doc text", &[Category::RedFlags], None)
            .await;
        assert_eq!(primary.calls(), 1);
        assert_eq!(
            report.provenance[&Category::RedFlags],
            Provenance::FailurePlaceholder
        );
        assert!(report.insights[&Category::RedFlags].contains("Unable to generate Red Flags"));
    }

    #[tokio::test]
    async fn placeholders_are_not_cached() {
        let h = harness(100.0);
        let primary = Arc::new(
            Scripted::new("primary", false)
                .fail("forensic", vec![BackendError::Auth("bad key".to_string())]),
        );
        let orch = orchestrator(&h, primary.clone(), None);
        let categories = [Category::BusinessSummary, Category::RedFlags];
        orch.generate(Mode::Backends, "doc text", &categories, None).await;

        let second = orch.generate(Mode::Backends, "doc text", &categories, None).await;
        assert_eq!(second.provenance[&Category::BusinessSummary], Provenance::Cache);
        assert_eq!(
            second.provenance[&Category::RedFlags],
            Provenance::Backend("primary".to_string())
        );
    }

    #[tokio::test]
    async fn paid_backend_gated_free_secondary_still_used() {
        let h = harness(1.0);
        h.ledger
            .record_call(
                &Scripted::new("primary", true).config,
                &CompletionRequest::new("x".repeat(4000)),
                &Ok(Completion {
                    text: "y".to_string(),
                    prompt_tokens: Some(1000),
                    completion_tokens: Some(0),
                }),
                None,
            )
            .await
            .unwrap();

        let primary = Arc::new(Scripted::new("primary", true));
        let secondary = Arc::new(Scripted::new("local", false));
        let orch = orchestrator(&h, primary.clone(), Some(secondary.clone()));
        let report = orch
            .generate(Mode::Backends, "doc text", &[Category::Moat], None)
            .await;
        assert_eq!(primary.calls(), 0);
        assert_eq!(
            report.provenance[&Category::Moat],
            Provenance::Backend("local".to_string())
        );
    }

    #[tokio::test]
    async fn paid_calls_stop_once_spend_crosses_gate_mid_batch() {
        let h = harness(1.0);
        h.ledger
            .record_call(
                &Scripted::new("primary", true).config,
                &CompletionRequest::new("x"),
                &Ok(Completion {
                    text: "y".to_string(),
                    prompt_tokens: Some(940),
                    completion_tokens: Some(0),
                }),
                None,
            )
            .await
            .unwrap();

        // 94% spent; each call adds 1.5%, so only the first call fits.
        let primary = Arc::new(Scripted::new("primary", true));
        let backends = BackendSet {
            primary: Some(primary.clone()),
            secondary: None,
            summarizer: None,
        };
        let orch = Orchestrator::new(backends, h.cache.clone(), h.ledger.clone(), fast_retry(), 1);
        let categories = [
            Category::BusinessSummary,
            Category::Financial,
            Category::Moat,
            Category::RedFlags,
        ];
        let report = orch.generate(Mode::Backends, "doc text", &categories, None).await;

        assert_eq!(primary.calls(), 1);
        let refused = report
            .provenance
            .values()
            .filter(|p| **p == Provenance::BudgetPlaceholder)
            .count();
        assert_eq!(refused, 3);
        assert_eq!(report.insights.len(), 4);
        assert_eq!(h.ledger.summary().await.unwrap().total_requests, 2);
    }

    #[tokio::test]
    async fn budget_text_in_a_failure_does_not_count_as_budget_refusal() {
        let h = harness(100.0);
        let primary = Arc::new(Scripted::new("primary", false).fail(
            "forensic",
            vec![BackendError::Auth("data-budget-exceeded".to_string())],
        ));
        let orch = orchestrator(&h, primary.clone(), None);
        let report = orch
            .generate(Mode::Backends, "doc text", &[Category::RedFlags], None)
            .await;
        assert_eq!(
            report.provenance[&Category::RedFlags],
            Provenance::FailurePlaceholder
        );
    }

    #[tokio::test]
    async fn labeled_batch_returns_every_key() {
        let h = harness(100.0);
        let primary = Arc::new(
            Scripted::new("primary", false)
                .fail("second", vec![BackendError::Auth("bad key".to_string())]),
        );
        let orch = orchestrator(&h, primary.clone(), None);
        let prompts = vec![
            LabeledPrompt {
                key: 1u8,
                label: "First",
                request: CompletionRequest::new("first prompt"),
            },
            LabeledPrompt {
                key: 2u8,
                label: "Second",
                request: CompletionRequest::new("second prompt"),
            },
        ];
        let mut results = orch.complete_batch(prompts, None).await;
        results.sort_by_key(|(k, _)| *k);

        assert_eq!(results[0].1.provenance, Provenance::Backend("primary".to_string()));
        assert_eq!(results[1].1.provenance, Provenance::FailurePlaceholder);
        assert!(results[1].1.text.contains("Unable to generate Second"));
    }

    #[tokio::test]
    async fn regenerate_bypasses_cached_category() {
        let h = harness(100.0);
        let primary = Arc::new(Scripted::new("primary", false));
        let orch = orchestrator(&h, primary.clone(), None);
        orch.generate(Mode::Backends, "doc", &[Category::Moat], None).await;
        assert_eq!(primary.calls(), 1);

        let report = orch.regenerate(Mode::Backends, "doc", Category::Moat, None).await;
        assert_eq!(primary.calls(), 2);
        assert!(matches!(report.provenance[&Category::Moat], Provenance::Backend(_)));
    }

    #[tokio::test]
    async fn demo_and_local_make_no_calls() {
        let h = harness(100.0);
        let primary = Arc::new(Scripted::new("primary", true));
        let orch = orchestrator(&h, primary.clone(), None);

        let demo = orch
            .generate(Mode::Demo(Sector::Financial), "", &[Category::BusinessSummary], None)
            .await;
        assert_eq!(demo.provenance[&Category::BusinessSummary], Provenance::Template);

        let local = orch
            .generate(Mode::Local, "Revenue grew 5%.", &[Category::Financial], None)
            .await;
        assert_eq!(local.provenance[&Category::Financial], Provenance::Rules);
        assert_eq!(primary.calls(), 0);
    }

    #[test]
    fn demo_takes_precedence_over_local() {
        let options = ProcessingOptions {
            demo_mode: true,
            local_only: true,
            ..ProcessingOptions::default()
        };
        let metadata = DocumentMetadata {
            company_name: Some("Community Bank".to_string()),
            ..DocumentMetadata::default()
        };
        assert_eq!(
            Mode::for_document(&options, &metadata),
            Mode::Demo(Sector::Financial)
        );
    }
}
