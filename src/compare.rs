//! Cross-document comparison.
//!
//! Lines up the stored insights of two or more documents, oldest first,
//! and asks the backends how the company changed between them. One prompt
//! per [`ComparisonCategory`]; each sees every document.
//!
//! Comparisons are computed on request and never cached or persisted.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::categories::Category;
use crate::error::PipelineError;
use crate::models::{DocumentRef, InsightRecord};
use crate::orchestrator::{Generated, Provenance};
use crate::text::{head, TRUNCATION_MARKER};

pub const COMPARISON_SYSTEM_PROMPT: &str =
    "You are a financial analyst comparing company documents across different time periods.";

/// Longest excerpt of a single insight placed in a comparison prompt.
pub const MAX_INSIGHT_CHARS: usize = 4_000;

/// Insights every comparison shows first, with their section headings.
const CORE_SECTIONS: [(Category, &str); 4] = [
    (Category::BusinessSummary, "BUSINESS SUMMARY"),
    (Category::Financial, "FINANCIAL METRICS"),
    (Category::Management, "MANAGEMENT"),
    (Category::Moat, "COMPETITIVE POSITION"),
];

const SEPARATOR_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonCategory {
    FinancialComparison,
    BusinessEvolution,
    ManagementChanges,
    StrategicShifts,
}

pub const ALL_COMPARISONS: [ComparisonCategory; 4] = [
    ComparisonCategory::FinancialComparison,
    ComparisonCategory::BusinessEvolution,
    ComparisonCategory::ManagementChanges,
    ComparisonCategory::StrategicShifts,
];

impl ComparisonCategory {
    pub fn key(&self) -> &'static str {
        match self {
            ComparisonCategory::FinancialComparison => "financial_comparison",
            ComparisonCategory::BusinessEvolution => "business_evolution",
            ComparisonCategory::ManagementChanges => "management_changes",
            ComparisonCategory::StrategicShifts => "strategic_shifts",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ComparisonCategory::FinancialComparison => "Financial Comparison",
            ComparisonCategory::BusinessEvolution => "Business Evolution",
            ComparisonCategory::ManagementChanges => "Management Changes",
            ComparisonCategory::StrategicShifts => "Strategic Shifts",
        }
    }

    /// `{documents}` is replaced with [`format_documents`] output.
    pub fn template(&self) -> &'static str {
        match self {
            ComparisonCategory::FinancialComparison => TEMPLATE_FINANCIAL_COMPARISON,
            ComparisonCategory::BusinessEvolution => TEMPLATE_BUSINESS_EVOLUTION,
            ComparisonCategory::ManagementChanges => TEMPLATE_MANAGEMENT_CHANGES,
            ComparisonCategory::StrategicShifts => TEMPLATE_STRATEGIC_SHIFTS,
        }
    }

    pub fn render_prompt(&self, documents: &str) -> String {
        self.template().replace("{documents}", documents)
    }
}

impl fmt::Display for ComparisonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One document's side of a comparison.
#[derive(Debug, Clone, Serialize)]
pub struct ComparedDocument {
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    #[serde(skip)]
    pub insights: BTreeMap<Category, String>,
}

impl ComparedDocument {
    pub fn new(doc: &DocumentRef, insights: &[InsightRecord]) -> Self {
        Self {
            id: doc.id.clone(),
            title: document_label(doc),
            date: doc.created_at,
            insights: insights
                .iter()
                .map(|r| (r.category, r.content.clone()))
                .collect(),
        }
    }
}

/// Title, else company, else the id.
pub fn document_label(doc: &DocumentRef) -> String {
    let present = |s: &Option<String>| {
        s.as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    present(&doc.metadata.title)
        .or_else(|| present(&doc.metadata.company_name))
        .unwrap_or_else(|| format!("Document {}", doc.id))
}

/// Result of comparing documents.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    /// Oldest first.
    pub documents: Vec<ComparedDocument>,
    pub results: BTreeMap<ComparisonCategory, String>,
    #[serde(skip)]
    pub provenance: BTreeMap<ComparisonCategory, Provenance>,
}

impl Comparison {
    pub fn new(
        documents: Vec<ComparedDocument>,
        generated: Vec<(ComparisonCategory, Generated)>,
    ) -> Self {
        let mut results = BTreeMap::new();
        let mut provenance = BTreeMap::new();
        for (category, outcome) in generated {
            results.insert(category, outcome.text);
            provenance.insert(category, outcome.provenance);
        }
        Self {
            documents,
            results,
            provenance,
        }
    }

    pub fn placeholders(&self) -> usize {
        self.provenance.values().filter(|p| p.is_placeholder()).count()
    }
}

/// Trimmed ids, at least two, no repeats.
pub fn validate_ids(ids: &[String]) -> Result<Vec<String>, PipelineError> {
    let ids: Vec<String> = ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.len() < 2 {
        return Err(PipelineError::Comparison(
            "select at least 2 documents to compare".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    if let Some(repeated) = ids.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(PipelineError::Comparison(format!(
            "document {} is listed more than once",
            repeated
        )));
    }
    Ok(ids)
}

/// Prompt block listing every document's insights, core sections first.
pub fn format_documents(documents: &[ComparedDocument]) -> String {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    let mut out = String::from("DOCUMENTS TO COMPARE:\n\n");

    for (i, doc) in documents.iter().enumerate() {
        out.push_str(&format!(
            "DOCUMENT {}: {} (Date: {})\n{}\n",
            i + 1,
            doc.title,
            doc.date.format("%Y-%m-%d"),
            separator
        ));

        for (category, heading) in CORE_SECTIONS {
            let content = doc.insights.get(&category).map(String::as_str);
            push_section(&mut out, heading, content.unwrap_or("Not available"));
        }
        for (category, content) in &doc.insights {
            if CORE_SECTIONS.iter().any(|(core, _)| core == category) {
                continue;
            }
            push_section(&mut out, &category.display_name().to_uppercase(), content);
        }

        out.push('\n');
        out.push_str(&separator);
        out.push_str("\n\n");
    }
    out
}

fn push_section(out: &mut String, heading: &str, content: &str) {
    out.push_str(heading);
    out.push_str(":\n");
    out.push_str(head(content, MAX_INSIGHT_CHARS));
    if content.chars().count() > MAX_INSIGHT_CHARS {
        out.push_str(TRUNCATION_MARKER);
    }
    out.push_str("\n\n");
}

const TEMPLATE_FINANCIAL_COMPARISON: &str = r#"Compare the company's financial performance across the periods covered by these documents.

Cover revenue and profit trends, gross, operating and net margins, debt and leverage, returns on capital and cash flow.

Respond in HTML with these sections:
<h4>Financial Trend Summary</h4>
<h4>Key Metrics Comparison</h4> (a table or list of the main figures per period)
<h4>Notable Financial Changes</h4>
<h4>Red Flags or Improvements</h4>

Quote figures and percentages from the documents and say what each change suggests about where the company is heading.

{documents}"#;

const TEMPLATE_BUSINESS_EVOLUTION: &str = r#"Compare how the company's business model and operations changed across these documents.

Cover the core business model, products and services, market position, target customers and geographic footprint.

Respond in HTML with these sections:
<h4>Business Evolution Summary</h4>
<h4>Product/Service Portfolio Changes</h4>
<h4>Market Position Shifts</h4>
<h4>Strategic Pivots</h4>

Use concrete examples from the documents and judge whether each change strengthens or weakens the company.

{documents}"#;

const TEMPLATE_MANAGEMENT_CHANGES: &str = r#"Compare the company's leadership and governance across these documents.

Cover leadership changes, the tone of management's communication, capital allocation priorities, compensation and governance.

Respond in HTML with these sections:
<h4>Management Evolution Summary</h4>
<h4>Leadership Transitions</h4>
<h4>Shareholder Alignment Trends</h4>
<h4>Communication Style Shifts</h4>

Quote management where it helps and judge each change from a shareholder's point of view.

{documents}"#;

const TEMPLATE_STRATEGIC_SHIFTS: &str = r#"Compare the company's strategic direction across these documents.

Cover long-term vision, strategic priorities, competitive positioning, investment focus and appetite for risk.

Respond in HTML with these sections:
<h4>Strategic Evolution Summary</h4>
<h4>Core Focus Shifts</h4>
<h4>Competitive Strategy Changes</h4>
<h4>Investment Priority Changes</h4>
<h4>Strategic Consistency Assessment</h4>

Support each point with examples from the documents and judge whether the strategy is coherent and creates value.

{documents}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentMetadata, ProcessingOptions, SourceKind};
    use chrono::TimeZone;

    fn compared(title: &str, year: i32, insights: &[(Category, &str)]) -> ComparedDocument {
        ComparedDocument {
            id: title.to_lowercase(),
            title: title.to_string(),
            date: Utc.with_ymd_and_hms(year, 3, 1, 0, 0, 0).unwrap(),
            insights: insights
                .iter()
                .map(|(c, text)| (*c, text.to_string()))
                .collect(),
        }
    }

    #[test]
    fn fewer_than_two_ids_rejected() {
        let err = validate_ids(&["a".to_string(), "  ".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::Comparison(_)));
        assert!(err.to_string().contains("at least 2"));
    }

    #[test]
    fn repeated_id_rejected() {
        let ids = vec!["a".to_string(), "b".to_string(), " a ".to_string()];
        let err = validate_ids(&ids).unwrap_err();
        assert!(err.to_string().contains("document a"));
        assert_eq!(
            validate_ids(&["a".to_string(), "b".to_string()]).unwrap(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn documents_block_lists_core_sections_then_extras() {
        let docs = vec![
            compared(
                "FY2022",
                2022,
                &[
                    (Category::Financial, "Revenue $1.0B"),
                    (Category::RedFlags, "Customer concentration"),
                ],
            ),
            compared("FY2023", 2023, &[(Category::BusinessSummary, "Makes widgets")]),
        ];
        let block = format_documents(&docs);

        assert!(block.starts_with("DOCUMENTS TO COMPARE:"));
        assert!(block.contains("DOCUMENT 1: FY2022 (Date: 2022-03-01)"));
        assert!(block.contains("DOCUMENT 2: FY2023 (Date: 2023-03-01)"));
        assert!(block.contains("FINANCIAL METRICS:\nRevenue $1.0B"));
        assert!(block.contains("RED FLAGS:\nCustomer concentration"));

        let first = block.find("DOCUMENT 1").unwrap();
        let second = block.find("DOCUMENT 2").unwrap();
        let first_doc = &block[first..second];
        assert!(first_doc.contains("BUSINESS SUMMARY:\nNot available"));
        assert!(first_doc.find("COMPETITIVE POSITION").unwrap() < first_doc.find("RED FLAGS").unwrap());
    }

    #[test]
    fn long_insights_are_capped() {
        let long = "x".repeat(MAX_INSIGHT_CHARS * 2);
        let docs = vec![compared("Big", 2024, &[(Category::Moat, &long)])];
        let block = format_documents(&docs);
        assert!(block.contains("content truncated"));
        assert!(block.len() < MAX_INSIGHT_CHARS + 1_000);
    }

    #[test]
    fn every_template_has_documents_slot() {
        for category in ALL_COMPARISONS {
            let prompt = category.render_prompt("DOCS-HERE");
            assert!(prompt.contains("DOCS-HERE"), "{}", category);
            assert!(!prompt.contains("{documents}"));
        }
    }

    #[test]
    fn label_falls_back_to_company_then_id() {
        let doc = DocumentRef::new(SourceKind::Url, "https://x.example", ProcessingOptions::default());
        assert_eq!(document_label(&doc), format!("Document {}", doc.id));

        let named = doc.clone().with_metadata(DocumentMetadata {
            company_name: Some("Acme".to_string()),
            ..DocumentMetadata::default()
        });
        assert_eq!(document_label(&named), "Acme");
    }
}
