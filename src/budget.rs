//! Content budgeter: fits extracted text into a spend-aware input budget.
//!
//! The token budget shrinks as monthly spend rises (×0.75 at 75 %, ×0.5 at
//! 90 %). Content that fits passes through untouched. Oversized content is
//! reduced either by one summarizer call plus head/middle/tail excerpts or,
//! without a usable summarizer, by pulling the sections under well-known
//! report headings plus the head and tail. The result never exceeds the
//! budget's character equivalent (4 chars per token).

use std::time::Duration;

use tracing::{info, warn};

use crate::backend::{Backend, CompletionRequest};
use crate::ledger::UsageLedger;
use crate::text::{head, tail, truncate_head_mid_tail, TRUNCATION_MARKER};

pub const CHARS_PER_TOKEN: usize = 4;

/// Spend level at which paid calls are refused.
pub const PAID_CALL_GATE_PERCENT: f64 = 95.0;

/// Input sent to the summarizer is itself capped.
const SUMMARY_INPUT_CHARS: usize = 24_000;

/// Share of the budget kept for the summary in summarize mode.
const SUMMARY_SHARE: f64 = 0.4;

/// Headings that anchor the most useful parts of annual reports.
pub const SECTION_HEADINGS: &[&str] = &[
    "item 1. business",
    "business overview",
    "risk factors",
    "management's discussion",
    "results of operations",
    "liquidity and capital resources",
    "financial statements",
    "competition",
    "outlook",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStrategy {
    PassThrough,
    Summarized,
    SectionExtract,
}

#[derive(Debug, Clone)]
pub struct BudgetedContent {
    pub text: String,
    pub strategy: BudgetStrategy,
}

/// Everything the budgeter needs besides the content.
pub struct BudgetContext<'a> {
    /// Current monthly spend as a percentage of the cap.
    pub used_percent: f64,
    pub summarizer: Option<&'a dyn Backend>,
    pub ledger: &'a UsageLedger,
    pub document_id: Option<&'a str>,
}

/// Token budget after spend-based shrinking.
pub fn effective_token_budget(max_tokens: usize, used_percent: f64) -> usize {
    if used_percent >= 90.0 {
        max_tokens / 2
    } else if used_percent >= 75.0 {
        max_tokens * 3 / 4
    } else {
        max_tokens
    }
}

pub struct ContentBudgeter {
    max_input_tokens: usize,
}

impl ContentBudgeter {
    pub fn new(max_input_tokens: usize) -> Self {
        Self { max_input_tokens }
    }

    pub fn budget_chars(&self, used_percent: f64) -> usize {
        effective_token_budget(self.max_input_tokens, used_percent) * CHARS_PER_TOKEN
    }

    pub async fn fit(&self, content: &str, ctx: BudgetContext<'_>) -> BudgetedContent {
        let budget = self.budget_chars(ctx.used_percent);
        let chars = content.chars().count();
        if chars <= budget {
            return BudgetedContent {
                text: content.to_string(),
                strategy: BudgetStrategy::PassThrough,
            };
        }

        info!(chars, budget, used_percent = ctx.used_percent, "Content over budget");

        if let Some(summarizer) = ctx.summarizer {
            let gated = summarizer.is_paid() && current_spend(&ctx).await >= PAID_CALL_GATE_PERCENT;
            if gated {
                warn!(backend = summarizer.name(), "Budget gate closed, skipping summarizer");
            } else if let Some(summary) = summarize(summarizer, content, budget, &ctx).await {
                let text = compose_summary(&summary, content, budget);
                return BudgetedContent {
                    text: hard_cap(text, budget),
                    strategy: BudgetStrategy::Summarized,
                };
            }
        }

        BudgetedContent {
            text: hard_cap(section_extract(content, budget), budget),
            strategy: BudgetStrategy::SectionExtract,
        }
    }
}

/// Spend right before a paid call: the ledger may have moved since the
/// caller sampled it.
async fn current_spend(ctx: &BudgetContext<'_>) -> f64 {
    match ctx.ledger.budget_status().await {
        Ok(status) => status.used_percent.max(ctx.used_percent),
        Err(e) => {
            warn!(error = %e, "Could not read budget status");
            ctx.used_percent
        }
    }
}

async fn summarize(
    backend: &dyn Backend,
    content: &str,
    budget_chars: usize,
    ctx: &BudgetContext<'_>,
) -> Option<String> {
    let (sample, _) = truncate_head_mid_tail(content, SUMMARY_INPUT_CHARS);
    let target_words = ((budget_chars as f64 * SUMMARY_SHARE) / 6.0).max(50.0) as usize;
    let request = CompletionRequest::new(format!(
        "Summarize the following company document in at most {} words. Keep concrete facts: \
         what the business does, revenue and profit figures, debt, risks, management statements \
         and competitive position. Plain text only.\n\nDOCUMENT:\n{}",
        target_words, sample
    ))
    .with_system("You condense long company reports without losing key facts.");

    let deadline = backend.config().timeout + Duration::from_secs(1);
    let outcome = match tokio::time::timeout(deadline, backend.complete(&request)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(crate::error::BackendError::Timeout),
    };
    if let Err(e) = ctx
        .ledger
        .record_call(backend.config(), &request, &outcome, ctx.document_id)
        .await
    {
        warn!(error = %e, "Could not record summarizer usage");
    }

    match outcome {
        Ok(completion) if !completion.text.trim().is_empty() => Some(completion.text),
        Ok(_) => {
            warn!(backend = backend.name(), "Summarizer returned nothing");
            None
        }
        Err(e) => {
            warn!(backend = backend.name(), error = %e, "Summarizer failed, extracting sections");
            None
        }
    }
}

fn compose_summary(summary: &str, content: &str, budget: usize) -> String {
    let summary = head(summary.trim(), (budget as f64 * SUMMARY_SHARE) as usize);
    let header = "SUMMARY:\n";
    let excerpt_header = "\n\nEXCERPTS:\n";
    let used = header.len() + summary.chars().count() + excerpt_header.len();
    let (excerpts, _) = truncate_head_mid_tail(content, budget.saturating_sub(used));
    format!("{}{}{}{}", header, summary, excerpt_header, excerpts)
}

/// First position of each known heading, skipping a table-of-contents
/// mention when the heading appears again later.
fn heading_positions(content: &str) -> Vec<usize> {
    let lower = content.to_ascii_lowercase();
    let mut positions: Vec<usize> = SECTION_HEADINGS
        .iter()
        .filter_map(|heading| {
            let mut hits = lower.match_indices(heading).map(|(i, _)| i);
            let first = hits.next()?;
            Some(hits.next().unwrap_or(first))
        })
        .collect();
    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Head, tail and the text under each known heading, within `budget` chars.
pub fn section_extract(content: &str, budget: usize) -> String {
    let positions = heading_positions(content);
    if positions.is_empty() {
        return truncate_head_mid_tail(content, budget).0;
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    let overhead = marker_len * (positions.len() + 1);
    let usable = budget.saturating_sub(overhead);
    let head_len = usable * 15 / 100;
    let tail_len = usable / 10;
    let per_section = (usable - head_len - tail_len) / positions.len();

    let mut out = String::with_capacity(budget);
    out.push_str(head(content, head_len));
    for pos in positions {
        out.push_str(TRUNCATION_MARKER);
        out.push_str(head(&content[pos..], per_section));
    }
    out.push_str(TRUNCATION_MARKER);
    out.push_str(tail(content, tail_len));
    out
}

fn hard_cap(text: String, budget: usize) -> String {
    if text.chars().count() <= budget {
        text
    } else {
        head(&text, budget).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, BackendKind, Completion, Rates};
    use crate::error::BackendError;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CannedSummarizer {
        config: BackendConfig,
        calls: AtomicUsize,
    }

    impl CannedSummarizer {
        fn new(paid: bool) -> Self {
            let rates = if paid {
                Rates {
                    prompt_per_1k: 0.001,
                    completion_per_1k: 0.001,
                }
            } else {
                Rates::FREE
            };
            Self {
                config: BackendConfig {
                    name: "summarizer".to_string(),
                    kind: BackendKind::Ollama,
                    model: "tiny".to_string(),
                    url: None,
                    api_key: None,
                    timeout: Duration::from_secs(15),
                    max_tokens: 200,
                    temperature: 0.2,
                    rates,
                },
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Backend for CannedSummarizer {
        fn config(&self) -> &BackendConfig {
            &self.config
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: "Widget maker with rising revenue.".to_string(),
                prompt_tokens: None,
                completion_tokens: None,
            })
        }
    }

    fn ledger() -> UsageLedger {
        UsageLedger::new(Arc::new(InMemoryStore::new()), 10.0)
    }

    #[test]
    fn budget_shrinks_with_spend() {
        assert_eq!(effective_token_budget(4000, 10.0), 4000);
        assert_eq!(effective_token_budget(4000, 75.0), 3000);
        assert_eq!(effective_token_budget(4000, 89.9), 3000);
        assert_eq!(effective_token_budget(4000, 90.0), 2000);
    }

    #[tokio::test]
    async fn small_content_passes_through() {
        let ledger = ledger();
        let budgeter = ContentBudgeter::new(100);
        let out = budgeter
            .fit(
                "short document",
                BudgetContext {
                    used_percent: 0.0,
                    summarizer: None,
                    ledger: &ledger,
                    document_id: None,
                },
            )
            .await;
        assert_eq!(out.strategy, BudgetStrategy::PassThrough);
        assert_eq!(out.text, "short document");
    }

    #[tokio::test]
    async fn summarizer_used_when_available() {
        let ledger = ledger();
        let summarizer = CannedSummarizer::new(false);
        let budgeter = ContentBudgeter::new(500);
        let content = "Annual report text. ".repeat(1000);
        let out = budgeter
            .fit(
                &content,
                BudgetContext {
                    used_percent: 0.0,
                    summarizer: Some(&summarizer),
                    ledger: &ledger,
                    document_id: Some("doc"),
                },
            )
            .await;
        assert_eq!(out.strategy, BudgetStrategy::Summarized);
        assert!(out.text.starts_with("SUMMARY:\nWidget maker"));
        assert!(out.text.chars().count() <= 2000);
        assert_eq!(ledger.summary().await.unwrap().total_requests, 1);
    }

    #[tokio::test]
    async fn paid_summarizer_skipped_past_gate() {
        let ledger = ledger();
        let summarizer = CannedSummarizer::new(true);
        let budgeter = ContentBudgeter::new(500);
        let content = format!("{}Risk Factors: supply chain. {}", "x".repeat(5000), "y".repeat(5000));
        let out = budgeter
            .fit(
                &content,
                BudgetContext {
                    used_percent: 96.0,
                    summarizer: Some(&summarizer),
                    ledger: &ledger,
                    document_id: None,
                },
            )
            .await;
        assert_eq!(out.strategy, BudgetStrategy::SectionExtract);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
        // Budget halved at this spend level.
        assert!(out.text.chars().count() <= 1000);
        assert!(out.text.contains("Risk Factors: supply chain."));
    }

    #[tokio::test]
    async fn paid_summarizer_rechecks_ledger_before_calling() {
        let ledger = UsageLedger::new(Arc::new(InMemoryStore::new()), 1.0);
        let expensive = CannedSummarizer::new(true);
        ledger
            .record_call(
                &expensive.config,
                &CompletionRequest::new("x"),
                &Ok(Completion {
                    text: "y".to_string(),
                    prompt_tokens: Some(960_000),
                    completion_tokens: Some(0),
                }),
                None,
            )
            .await
            .unwrap();
        assert!(ledger.budget_status().await.unwrap().used_percent >= 95.0);

        let budgeter = ContentBudgeter::new(500);
        let content = "Annual report text. ".repeat(1000);
        let out = budgeter
            .fit(
                &content,
                BudgetContext {
                    used_percent: 0.0,
                    summarizer: Some(&expensive),
                    ledger: &ledger,
                    document_id: None,
                },
            )
            .await;
        assert_eq!(out.strategy, BudgetStrategy::SectionExtract);
        assert_eq!(expensive.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn section_extract_skips_table_of_contents() {
        let content = format!(
            "Contents: Risk Factors ... 12\n{}\nRisk Factors\nOur suppliers are concentrated.\n{}",
            "filler ".repeat(400),
            "more ".repeat(400)
        );
        let out = section_extract(&content, 1200);
        assert!(out.contains("Risk Factors\nOur suppliers are concentrated."));
        assert!(out.chars().count() <= 1200);
    }

    #[test]
    fn section_extract_without_headings_uses_head_mid_tail() {
        let content = "z".repeat(10_000);
        let out = section_extract(&content, 500);
        assert_eq!(out.matches("content truncated").count(), 2);
    }
}
