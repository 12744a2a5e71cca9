//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, extracted text, insights, jobs and
//! usage events that flow through ingestion and insight generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::categories::Category;

/// Where a document's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Url,
    Filing,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Url => "url",
            SourceKind::Filing => "filing",
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" | "pdf" => Ok(SourceKind::File),
            "url" => Ok(SourceKind::Url),
            "filing" | "edgar" => Ok(SourceKind::Filing),
            other => Err(format!("unknown source kind: '{}'", other)),
        }
    }
}

/// Per-document processing switches. Immutable once a job starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Serve curated templates without extraction or backend calls.
    #[serde(default)]
    pub demo_mode: bool,
    /// Rule-based keyword analysis; no backend calls.
    #[serde(default)]
    pub local_only: bool,
    /// Analysis lens, e.g. `value`, `buffett`, `forensic`.
    #[serde(default)]
    pub persona_lens: Option<String>,
    /// Industry hint, e.g. `tech`, `financial`, `biotech`.
    #[serde(default)]
    pub industry_hint: Option<String>,
}

/// Metadata derived from the source or supplied by the submitter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub filing_id: Option<String>,
}

/// Logical handle to a user-submitted source to analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub source_kind: SourceKind,
    /// File path, URL, or company identifier depending on `source_kind`.
    pub locator: String,
    pub options: ProcessingOptions,
    pub metadata: DocumentMetadata,
    /// Set on completion or cancellation so the document is not retried.
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl DocumentRef {
    pub fn new(source_kind: SourceKind, locator: impl Into<String>, options: ProcessingOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_kind,
            locator: locator.into(),
            options,
            metadata: DocumentMetadata::default(),
            processed: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// How a piece of extracted text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PdfFull,
    PdfStrided,
    PdfWeighted,
    PdfWholeDocument,
    WebMainContent,
    WebLinkedReport,
    BlockedPlaceholder,
    FilingHtml,
    FilingInlineXbrl,
    FilingRawText,
}

/// Transient extraction result. Never persisted beyond a run.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub text: String,
    pub method: ExtractionMethod,
    /// True when the text was cut and carries truncation markers.
    pub truncated: bool,
    /// Title found in the source itself (HTML `<title>`, PDF info dictionary).
    pub source_title: Option<String>,
}

impl ExtractedContent {
    pub fn new(text: String, method: ExtractionMethod) -> Self {
        Self {
            text,
            method,
            truncated: false,
            source_title: None,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Optional severity attached to an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Highest severity label that follows a "severity" mention in `text`.
    pub fn detect(text: &str) -> Option<Severity> {
        let lower = text.to_lowercase();
        let mut best = None;
        for (idx, _) in lower.match_indices("severity") {
            let window: String = lower[idx + "severity".len()..].chars().take(24).collect();
            let found = if window.contains("high") {
                Some(Severity::High)
            } else if window.contains("medium") {
                Some(Severity::Medium)
            } else if window.contains("low") {
                Some(Severity::Low)
            } else {
                None
            };
            best = best.max(found);
        }
        best
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity: '{}'", other)),
        }
    }
}

/// One insight per (document, category). Upserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightRecord {
    pub document_id: String,
    pub category: Category,
    pub content: String,
    pub severity: Option<Severity>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: '{}'", other)),
        }
    }
}

/// One processing job per document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingJob {
    pub id: String,
    pub document_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One backend call, successful or not. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEvent {
    pub backend: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub estimated_cost: f64,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub document_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_detects_highest_label() {
        let text = "<li>Debt load (Severity: Medium)</li><li>Restatement - severity: HIGH</li>";
        assert_eq!(Severity::detect(text), Some(Severity::High));
        assert_eq!(Severity::detect("Severity Low only"), Some(Severity::Low));
        assert_eq!(Severity::detect("no labels here"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn source_kind_parses_aliases() {
        assert_eq!("pdf".parse::<SourceKind>().unwrap(), SourceKind::File);
        assert_eq!("edgar".parse::<SourceKind>().unwrap(), SourceKind::Filing);
        assert!("ftp".parse::<SourceKind>().is_err());
    }
}
