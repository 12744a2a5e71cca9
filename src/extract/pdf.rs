//! PDF text extraction with size-tiered page sampling.
//!
//! | Tier | Pages | Pages read |
//! |------|-------|------------|
//! | Small | ≤ 30 | every page |
//! | Medium | 31–100 | every `stride`-th page, stride growing with size, plus the last |
//! | Large | > 100 | first 10, 5-page windows at 20 % / 40 % / 55 %, periodic samples after, last 5 |
//!
//! Pages are read on a bounded pool of blocking workers. Each worker parses
//! its own copy of the document, so the pool shrinks for very large files.
//! A page that fails or panics is logged and skipped.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use lopdf::{Document, Object};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::models::{ExtractedContent, ExtractionMethod};

const SMALL_MAX_PAGES: usize = 30;
const MEDIUM_MAX_PAGES: usize = 100;
const LARGE_HEAD_PAGES: usize = 10;
const LARGE_TAIL_PAGES: usize = 5;
const ZONE_WINDOW: usize = 5;
/// Business description, financial statements, management discussion.
const LARGE_ZONES: [f64; 3] = [0.20, 0.40, 0.55];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfTier {
    Small,
    Medium,
    Large,
}

impl PdfTier {
    pub fn for_page_count(pages: usize) -> Self {
        if pages <= SMALL_MAX_PAGES {
            PdfTier::Small
        } else if pages <= MEDIUM_MAX_PAGES {
            PdfTier::Medium
        } else {
            PdfTier::Large
        }
    }

    fn method(&self) -> ExtractionMethod {
        match self {
            PdfTier::Small => ExtractionMethod::PdfFull,
            PdfTier::Medium => ExtractionMethod::PdfStrided,
            PdfTier::Large => ExtractionMethod::PdfWeighted,
        }
    }
}

/// 1-based page numbers to read, ascending. Deterministic in `page_count`
/// and always contains the first and last page.
pub fn sampling_plan(page_count: usize) -> Vec<u32> {
    if page_count == 0 {
        return Vec::new();
    }
    let n = page_count;
    let mut pages = BTreeSet::new();

    match PdfTier::for_page_count(n) {
        PdfTier::Small => pages.extend(1..=n),
        PdfTier::Medium => {
            let stride = n.div_ceil(25).max(2);
            pages.extend((1..=n).step_by(stride));
        }
        PdfTier::Large => {
            pages.extend(1..=LARGE_HEAD_PAGES);
            for zone in LARGE_ZONES {
                let start = ((n as f64) * zone).round() as usize;
                pages.extend(start.max(1)..=(start + ZONE_WINDOW - 1).min(n));
            }
            let last_zone_end = ((n as f64) * LARGE_ZONES[2]).round() as usize + ZONE_WINDOW;
            let periodic = (n / 20).max(1);
            let tail_start = n - LARGE_TAIL_PAGES + 1;
            pages.extend((last_zone_end..tail_start).step_by(periodic));
            pages.extend(tail_start..=n);
        }
    }
    pages.insert(n);

    pages.into_iter().map(|p| p as u32).collect()
}

/// Blocking workers for a document of `page_count` pages.
pub fn worker_count(page_count: usize, max_workers: usize) -> usize {
    let max_workers = max_workers.max(1);
    if page_count <= MEDIUM_MAX_PAGES {
        max_workers
    } else if page_count <= 300 {
        max_workers.min(2)
    } else {
        1
    }
}

pub async fn extract_pdf_file(path: &Path, max_workers: usize) -> Result<ExtractedContent, PipelineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::Extraction(format!("cannot read {}: {}", path.display(), e)))?;
    extract_pdf_bytes(bytes, max_workers).await
}

pub async fn extract_pdf_bytes(
    bytes: Vec<u8>,
    max_workers: usize,
) -> Result<ExtractedContent, PipelineError> {
    let bytes: Arc<[u8]> = Arc::from(bytes);

    let header = Arc::clone(&bytes);
    let (page_count, title) = tokio::task::spawn_blocking(move || {
        catch_unwind(AssertUnwindSafe(|| {
            Document::load_mem(&header)
                .map(|doc| (doc.get_pages().len(), document_title(&doc)))
                .map_err(|e| e.to_string())
        }))
    })
    .await
    .map_err(|e| PipelineError::Extraction(format!("PDF worker failed: {}", e)))?
    .map_err(|_| PipelineError::Extraction("PDF parser panicked".to_string()))?
    .map_err(|e| PipelineError::Extraction(format!("invalid or corrupted PDF: {}", e)))?;

    if page_count == 0 {
        return Err(PipelineError::Extraction("PDF has no pages".to_string()));
    }

    let tier = PdfTier::for_page_count(page_count);
    let plan = sampling_plan(page_count);
    let workers = worker_count(page_count, max_workers).min(plan.len());
    info!(
        pages = page_count,
        tier = ?tier,
        sampled = plan.len(),
        workers,
        "Extracting PDF"
    );

    let mut page_texts = read_pages(&bytes, &plan, workers).await;
    page_texts.sort_by_key(|(page, _)| *page);

    if page_texts.is_empty() {
        warn!("No sampled page yielded text, trying whole-document extraction");
        let text = whole_document_text(Arc::clone(&bytes)).await?;
        let mut content = ExtractedContent::new(text, ExtractionMethod::PdfWholeDocument);
        content.source_title = title;
        return Ok(content);
    }

    let read = page_texts.len();
    let text = assemble(&page_texts, page_count);
    debug!(pages_with_text = read, chars = text.len(), "PDF extraction complete");

    let mut content = ExtractedContent::new(text, tier.method());
    content.truncated = plan.len() < page_count;
    content.source_title = title;
    Ok(content)
}

/// Read `plan` on `workers` blocking tasks. Pages are dealt round-robin.
async fn read_pages(bytes: &Arc<[u8]>, plan: &[u32], workers: usize) -> Vec<(u32, String)> {
    let workers = workers.max(1);
    let mut assignments: Vec<Vec<u32>> = vec![Vec::new(); workers];
    for (i, page) in plan.iter().enumerate() {
        assignments[i % workers].push(*page);
    }

    let tasks = assignments.into_iter().map(|pages| {
        let bytes = Arc::clone(bytes);
        tokio::task::spawn_blocking(move || read_page_batch(&bytes, &pages))
    });

    let mut out = Vec::with_capacity(plan.len());
    for result in futures::future::join_all(tasks).await {
        match result {
            Ok(batch) => out.extend(batch),
            Err(e) => warn!(error = %e, "PDF worker aborted; its pages are skipped"),
        }
    }
    out
}

fn read_page_batch(bytes: &[u8], pages: &[u32]) -> Vec<(u32, String)> {
    let doc = match catch_unwind(AssertUnwindSafe(|| Document::load_mem(bytes))) {
        Ok(Ok(doc)) => doc,
        Ok(Err(e)) => {
            warn!(error = %e, "PDF worker could not parse document");
            return Vec::new();
        }
        Err(_) => {
            warn!("PDF parser panicked in worker");
            return Vec::new();
        }
    };

    let mut out = Vec::with_capacity(pages.len());
    for &page in pages {
        match catch_unwind(AssertUnwindSafe(|| doc.extract_text(&[page]))) {
            Ok(Ok(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    debug!(page, "Page has no text");
                } else {
                    out.push((page, text.to_string()));
                }
            }
            Ok(Err(e)) => warn!(page, error = %e, "Skipping unreadable page"),
            Err(_) => warn!(page, "Skipping page that crashed the parser"),
        }
    }
    out
}

async fn whole_document_text(bytes: Arc<[u8]>) -> Result<String, PipelineError> {
    let result = tokio::task::spawn_blocking(move || {
        catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
        }))
    })
    .await
    .map_err(|e| PipelineError::Extraction(format!("PDF worker failed: {}", e)))?;

    match result {
        Ok(Ok(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        Ok(Ok(_)) => Err(PipelineError::Extraction(
            "no text could be extracted from any page".to_string(),
        )),
        Ok(Err(e)) => Err(PipelineError::Extraction(format!(
            "no page yielded text and whole-document extraction failed: {}",
            e
        ))),
        Err(_) => Err(PipelineError::Extraction(
            "no page yielded text and whole-document extraction panicked".to_string(),
        )),
    }
}

/// Join page texts with page markers and gap markers for skipped ranges.
fn assemble(pages: &[(u32, String)], page_count: usize) -> String {
    let mut out = String::new();
    let mut previous = 0u32;
    for (page, text) in pages {
        if *page > previous + 1 {
            out.push_str(&format!("[... pages {}-{} not sampled ...]\n\n", previous + 1, page - 1));
        }
        out.push_str(&format!("[Page {}]\n{}\n\n", page, text));
        previous = *page;
    }
    if (previous as usize) < page_count {
        out.push_str(&format!(
            "[... pages {}-{} not sampled ...]\n",
            previous + 1,
            page_count
        ));
    }
    out.trim_end().to_string()
}

fn document_title(doc: &Document) -> Option<String> {
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    match info.as_dict().ok()?.get(b"Title").ok()? {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        _ => None,
    }
}

/// PDF text strings are PDFDocEncoding or UTF-16BE with a BOM.
fn decode_pdf_string(bytes: &[u8]) -> Option<String> {
    let text = if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}
