//! Content extractors.
//!
//! Each [`Strategy`] has one extractor:
//! - [`pdf`] for uploaded files
//! - [`web`] for arbitrary URLs
//! - [`filing`] for regulatory filings located by company identifier
//!
//! Extraction either yields text or a [`PipelineError`] that aborts the job.

pub mod filing;
pub mod pdf;
pub mod web;

use std::sync::Arc;

use crate::config::ExtractionConfig;
use crate::error::PipelineError;
use crate::fetch::Fetcher;
use crate::models::ExtractedContent;
use crate::source::Strategy;

pub use filing::{CompanyMatch, FilingLocator};

/// Extractor settings plus the fetchers they use.
#[derive(Clone)]
pub struct Extractors {
    pub web_fetcher: Arc<dyn Fetcher>,
    /// Used for SEC endpoints, which require a declared user agent.
    pub sec_fetcher: Arc<dyn Fetcher>,
    pub config: ExtractionConfig,
}

impl Extractors {
    pub fn new(
        web_fetcher: Arc<dyn Fetcher>,
        sec_fetcher: Arc<dyn Fetcher>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            web_fetcher,
            sec_fetcher,
            config,
        }
    }

    /// Run the extractor for `strategy`.
    ///
    /// Filing extraction also returns the resolved locator so callers can
    /// record the accession number.
    pub async fn extract(
        &self,
        strategy: &Strategy,
    ) -> Result<(ExtractedContent, Option<FilingLocator>), PipelineError> {
        match strategy {
            Strategy::Pdf(path) => {
                let content = pdf::extract_pdf_file(path, self.config.max_pdf_workers).await?;
                Ok((content, None))
            }
            Strategy::Web(url) => {
                let settings = web::WebSettings {
                    max_chars: self.config.max_web_chars,
                    max_pdf_workers: self.config.max_pdf_workers,
                };
                let content = web::extract_url(self.web_fetcher.as_ref(), url, &settings).await?;
                Ok((content, None))
            }
            Strategy::Filing(company) => {
                let locator = self.resolve_latest_filing(company).await?;
                let content = filing::extract_filing(
                    self.sec_fetcher.as_ref(),
                    &locator,
                    self.config.min_filing_chars,
                )
                .await?;
                Ok((content, Some(locator)))
            }
        }
    }

    pub async fn search_company(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CompanyMatch>, PipelineError> {
        filing::search_company(self.sec_fetcher.as_ref(), query, limit).await
    }

    pub async fn resolve_latest_filing(&self, company: &str) -> Result<FilingLocator, PipelineError> {
        filing::resolve_latest_filing(self.sec_fetcher.as_ref(), company, &self.config.filing_form)
            .await
    }
}
