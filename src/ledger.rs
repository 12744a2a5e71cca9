//! Usage ledger: append-only record of backend calls and the monthly
//! spend derived from it.
//!
//! Costs come from each backend's per-1K-token [`Rates`](crate::backend::Rates).
//! When a provider does not report usage, tokens are estimated as
//! chars / 4, so totals are approximate and meant for budgeting only.
//! Failed calls are recorded with zero cost.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::backend::{BackendConfig, Completion, CompletionRequest};
use crate::error::BackendError;
use crate::models::UsageEvent;
use crate::store::Store;
use crate::text::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub within_budget: bool,
    pub used_percent: f64,
    pub remaining: f64,
    pub monthly_budget: f64,
    pub spent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendUsage {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DayUsage {
    pub requests: u64,
    pub tokens: u64,
    pub cost: f64,
}

/// Current-month usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub month_start: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
    pub per_backend: BTreeMap<String, BackendUsage>,
    /// Keyed by `YYYY-MM-DD`.
    pub per_day: BTreeMap<String, DayUsage>,
    pub budget: BudgetStatus,
}

/// First instant of the month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub struct UsageLedger {
    store: Arc<dyn Store>,
    monthly_budget: f64,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn Store>, monthly_budget: f64) -> Self {
        Self {
            store,
            monthly_budget,
        }
    }

    /// Append one event for a finished backend call.
    pub async fn record_call(
        &self,
        backend: &BackendConfig,
        request: &CompletionRequest,
        outcome: &Result<Completion, BackendError>,
        document_id: Option<&str>,
    ) -> Result<UsageEvent> {
        let estimated_prompt = request.char_len().div_ceil(4) as u32;
        let event = match outcome {
            Ok(completion) => {
                let prompt_tokens = completion.prompt_tokens.unwrap_or(estimated_prompt);
                let completion_tokens = completion
                    .completion_tokens
                    .unwrap_or_else(|| estimate_tokens(&completion.text));
                UsageEvent {
                    backend: backend.name.clone(),
                    prompt_tokens,
                    completion_tokens,
                    estimated_cost: backend.rates.cost(prompt_tokens, completion_tokens),
                    success: true,
                    error: None,
                    timestamp: Utc::now(),
                    document_id: document_id.map(str::to_string),
                }
            }
            Err(e) => UsageEvent {
                backend: backend.name.clone(),
                prompt_tokens: estimated_prompt,
                completion_tokens: 0,
                estimated_cost: 0.0,
                success: false,
                error: Some(e.to_string()),
                timestamp: Utc::now(),
                document_id: document_id.map(str::to_string),
            },
        };
        self.store.append_usage(&event).await?;
        debug!(
            backend = %event.backend,
            success = event.success,
            cost = event.estimated_cost,
            "Recorded backend call"
        );
        Ok(event)
    }

    pub async fn monthly_spend(&self) -> Result<f64> {
        let events = self.store.usage_since(month_start(Utc::now())).await?;
        Ok(events.iter().map(|e| e.estimated_cost).sum())
    }

    pub async fn budget_status(&self) -> Result<BudgetStatus> {
        let spent = self.monthly_spend().await?;
        Ok(self.status_for(spent))
    }

    fn status_for(&self, spent: f64) -> BudgetStatus {
        let used_percent = if self.monthly_budget > 0.0 {
            spent / self.monthly_budget * 100.0
        } else {
            100.0
        };
        BudgetStatus {
            within_budget: spent < self.monthly_budget,
            used_percent,
            remaining: (self.monthly_budget - spent).max(0.0),
            monthly_budget: self.monthly_budget,
            spent,
        }
    }

    pub async fn summary(&self) -> Result<UsageSummary> {
        self.summary_at(Utc::now()).await
    }

    pub async fn summary_at(&self, now: DateTime<Utc>) -> Result<UsageSummary> {
        let start = month_start(now);
        let events = self.store.usage_since(start).await?;

        let mut summary = UsageSummary {
            month_start: start,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_cost: 0.0,
            per_backend: BTreeMap::new(),
            per_day: BTreeMap::new(),
            budget: self.status_for(0.0),
        };

        for event in events.iter().filter(|e| e.timestamp <= now) {
            summary.total_requests += 1;
            if event.success {
                summary.successful_requests += 1;
            } else {
                summary.failed_requests += 1;
            }
            summary.prompt_tokens += event.prompt_tokens as u64;
            summary.completion_tokens += event.completion_tokens as u64;
            summary.total_cost += event.estimated_cost;

            let backend = summary.per_backend.entry(event.backend.clone()).or_default();
            backend.requests += 1;
            if event.success {
                backend.successes += 1;
            } else {
                backend.failures += 1;
            }
            backend.prompt_tokens += event.prompt_tokens as u64;
            backend.completion_tokens += event.completion_tokens as u64;
            backend.cost += event.estimated_cost;

            let day = summary
                .per_day
                .entry(event.timestamp.format("%Y-%m-%d").to_string())
                .or_default();
            day.requests += 1;
            day.tokens += (event.prompt_tokens + event.completion_tokens) as u64;
            day.cost += event.estimated_cost;
        }

        summary.budget = self.status_for(summary.total_cost);
        Ok(summary)
    }
}
