//! Source resolution and metadata sniffing.
//!
//! [`resolve`] maps a [`DocumentRef`] to the [`Strategy`] that will extract
//! its text. [`sniff_metadata`] fills in a document's company name and title
//! from, in priority order:
//!
//! 1. values supplied with the submission
//! 2. the [`KNOWN_COMPANIES`] identifier table
//! 3. metadata found in the source itself (page or PDF title)
//! 4. a placeholder
//!
//! Each step only fills fields still empty after the previous one.

use std::path::PathBuf;

use url::Url;

use crate::error::PipelineError;
use crate::models::{DocumentMetadata, DocumentRef, SourceKind};

/// Placeholder used when no step yields a company name.
pub const UNKNOWN_COMPANY: &str = "Unknown Company";

/// How a document's text will be obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Pdf(PathBuf),
    Web(Url),
    Filing(String),
}

/// A company that can be referenced by ticker or CIK without a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownCompany {
    pub name: &'static str,
    /// Zero-padded to ten digits.
    pub cik: &'static str,
    pub ticker: &'static str,
}

impl KnownCompany {
    /// CIK without leading zeros, as used in archive paths.
    pub fn cik_number(&self) -> &'static str {
        let trimmed = self.cik.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

pub const KNOWN_COMPANIES: &[KnownCompany] = &[
    KnownCompany {
        name: "Apple Inc.",
        cik: "0000320193",
        ticker: "AAPL",
    },
    KnownCompany {
        name: "Microsoft Corporation",
        cik: "0000789019",
        ticker: "MSFT",
    },
    KnownCompany {
        name: "Amazon.com, Inc.",
        cik: "0001018724",
        ticker: "AMZN",
    },
    KnownCompany {
        name: "Alphabet Inc.",
        cik: "0001652044",
        ticker: "GOOGL",
    },
    KnownCompany {
        name: "Meta Platforms, Inc.",
        cik: "0001326801",
        ticker: "META",
    },
    KnownCompany {
        name: "Tesla, Inc.",
        cik: "0001318605",
        ticker: "TSLA",
    },
    KnownCompany {
        name: "NVIDIA Corporation",
        cik: "0001045810",
        ticker: "NVDA",
    },
];

/// Look up a company by ticker (case-insensitive) or CIK (with or without
/// leading zeros).
pub fn lookup_company(identifier: &str) -> Option<&'static KnownCompany> {
    let id = identifier.trim();
    if id.is_empty() {
        return None;
    }
    if id.chars().all(|c| c.is_ascii_digit()) {
        let digits = id.trim_start_matches('0');
        return KNOWN_COMPANIES.iter().find(|c| c.cik_number() == digits);
    }
    KNOWN_COMPANIES
        .iter()
        .find(|c| c.ticker.eq_ignore_ascii_case(id))
}

/// Check that `raw` is an absolute http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<Url, PipelineError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| PipelineError::InvalidSource(format!("invalid URL '{}': {}", raw, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(PipelineError::InvalidSource(format!(
            "URL must use http or https: {}",
            raw
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(PipelineError::InvalidSource(format!("URL has no host: {}", raw)));
    }
    Ok(url)
}

/// Map a document to its extraction strategy.
pub fn resolve(doc: &DocumentRef) -> Result<Strategy, PipelineError> {
    match doc.source_kind {
        SourceKind::File => {
            let path = PathBuf::from(&doc.locator);
            if !path.is_file() {
                return Err(PipelineError::InvalidSource(format!(
                    "file not found: {}",
                    path.display()
                )));
            }
            Ok(Strategy::Pdf(path))
        }
        SourceKind::Url => Ok(Strategy::Web(validate_url(&doc.locator)?)),
        SourceKind::Filing => {
            let id = doc.locator.trim();
            if id.is_empty() {
                return Err(PipelineError::InvalidSource(
                    "empty company identifier".to_string(),
                ));
            }
            Ok(Strategy::Filing(id.to_string()))
        }
    }
}

/// Fill empty metadata fields using the documented priority order.
///
/// `source_title` is the title found in the fetched source, if any.
pub fn sniff_metadata(doc: &DocumentRef, source_title: Option<&str>) -> DocumentMetadata {
    let mut meta = doc.metadata.clone();
    let non_empty = |s: &Option<String>| s.as_deref().map_or(false, |v| !v.trim().is_empty());

    if doc.source_kind == SourceKind::Filing {
        if let Some(company) = lookup_company(&doc.locator) {
            if !non_empty(&meta.company_name) {
                meta.company_name = Some(company.name.to_string());
            }
        }
    }

    let source_title = source_title.map(str::trim).filter(|t| !t.is_empty());
    if !non_empty(&meta.title) {
        meta.title = source_title.map(str::to_string);
    }
    if !non_empty(&meta.company_name) {
        meta.company_name = source_title.and_then(company_from_title);
    }

    if !non_empty(&meta.company_name) {
        meta.company_name = Some(UNKNOWN_COMPANY.to_string());
    }
    if !non_empty(&meta.title) {
        meta.title = Some(default_title(doc, meta.company_name.as_deref()));
    }
    meta
}

/// Best-effort company name from a page title like "Acme Corp - Annual Report 2024".
fn company_from_title(title: &str) -> Option<String> {
    let first = title
        .split(['|', '-', ':', '\u{2013}', '\u{2014}'])
        .next()?
        .trim();
    let lower = first.to_lowercase();
    let looks_generic = ["annual report", "10-k", "form", "home", "investor"]
        .iter()
        .any(|w| lower.starts_with(w));
    if first.len() < 2 || looks_generic {
        None
    } else {
        Some(first.to_string())
    }
}

fn default_title(doc: &DocumentRef, company: Option<&str>) -> String {
    let company = company.unwrap_or(UNKNOWN_COMPANY);
    let mode = if doc.options.demo_mode { " (Demo)" } else { "" };
    match doc.source_kind {
        SourceKind::File => {
            let name = PathBuf::from(&doc.locator)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| doc.locator.clone());
            format!("{}{}", name, mode)
        }
        SourceKind::Url => format!("{}{}", doc.locator, mode),
        SourceKind::Filing => format!("{} - SEC Filing{}", company, mode),
    }
}
