//! Web page extraction.
//!
//! Fetches with browser headers, keeps the page's main content, and when a
//! page is only a thin shell (under [`MIN_WEB_CHARS`]) follows its most
//! likely report PDF link. Link following is bounded by
//! [`MAX_LINK_DEPTH`]. Hosts known to block automated clients get a
//! labeled placeholder instead of an error.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::pdf;
use crate::error::PipelineError;
use crate::fetch::{is_pdf_url, Fetcher};
use crate::models::{ExtractedContent, ExtractionMethod};
use crate::text::{normalize_whitespace, truncate_head_mid_tail};

/// Main content shorter than this triggers the linked-report fallback.
pub const MIN_WEB_CHARS: usize = 100;

/// How many links deep the report fallback may go.
pub const MAX_LINK_DEPTH: usize = 1;

/// Hosts that reject scripted access outright.
pub const BLOCKED_HOSTS: &[&str] = &[
    "wsj.com",
    "bloomberg.com",
    "ft.com",
    "barrons.com",
    "seekingalpha.com",
];

const MAIN_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    "#content",
    "#main",
    ".content",
    ".main",
    ".post-content",
    ".entry-content",
];

pub(crate) const HIDDEN_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "nav", "header", "footer", "aside", "template",
];

const REPORT_HINTS: &[&str] = &["annual", "report", "10-k", "10k", "investor", "financial"];

pub struct WebSettings {
    pub max_chars: usize,
    pub max_pdf_workers: usize,
}

pub fn is_blocked_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    BLOCKED_HOSTS
        .iter()
        .any(|blocked| host == *blocked || host.ends_with(&format!(".{}", blocked)))
}

/// Synthetic content for a host that blocks scraping.
pub fn blocked_placeholder(url: &Url) -> ExtractedContent {
    let host = url.host_str().unwrap_or("this site");
    let text = format!(
        "[PLACEHOLDER: content not retrieved]\n\
         The site {} blocks automated access, so the article at {} could not be read.\n\
         No figures or statements below come from the source. Upload the document as a PDF \
         or paste a link to the company's own investor relations page for a real analysis.",
        host, url
    );
    let mut content = ExtractedContent::new(text, ExtractionMethod::BlockedPlaceholder);
    content.source_title = Some(format!("{} (blocked)", host));
    content
}

pub async fn extract_url(
    fetcher: &dyn Fetcher,
    url: &Url,
    settings: &WebSettings,
) -> Result<ExtractedContent, PipelineError> {
    if is_blocked_host(url) {
        warn!(%url, "Host blocks automated access, using placeholder");
        return Ok(blocked_placeholder(url));
    }

    let mut target = url.clone();
    let mut depth = 0;
    loop {
        let page = fetcher
            .fetch(&target)
            .await
            .map_err(|e| PipelineError::Extraction(format!("failed to fetch {}: {:#}", target, e)))?;

        if page.is_pdf() {
            let mut content = pdf::extract_pdf_bytes(page.body, settings.max_pdf_workers).await?;
            if depth > 0 {
                content.method = ExtractionMethod::WebLinkedReport;
            }
            return Ok(cap(content, settings.max_chars));
        }

        let html = page.text();
        let (title, text) = main_content(&html);
        let chars = text.chars().count();
        if chars >= MIN_WEB_CHARS {
            info!(url = %page.url, chars, "Extracted main content");
            let method = if depth > 0 {
                ExtractionMethod::WebLinkedReport
            } else {
                ExtractionMethod::WebMainContent
            };
            let mut content = ExtractedContent::new(text, method);
            content.source_title = title;
            return Ok(cap(content, settings.max_chars));
        }

        if depth >= MAX_LINK_DEPTH {
            return Err(PipelineError::Extraction(format!(
                "insufficient content at {} ({} chars)",
                page.url, chars
            )));
        }
        match find_report_link(&html, &page.url) {
            Some(link) => {
                debug!(from = %page.url, to = %link, "Thin page, following report link");
                target = link;
                depth += 1;
            }
            None => {
                return Err(PipelineError::Extraction(format!(
                    "insufficient content at {} ({} chars) and no linked report found",
                    page.url, chars
                )))
            }
        }
    }
}

fn cap(mut content: ExtractedContent, max_chars: usize) -> ExtractedContent {
    let (text, truncated) = truncate_head_mid_tail(&content.text, max_chars);
    content.text = text;
    content.truncated |= truncated;
    content
}

/// Page title and visible main-content text.
pub fn main_content(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);
    let title = page_title(&document);

    for selector_str in MAIN_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = visible_text(element, HIDDEN_TAGS);
            if text.chars().count() >= MIN_WEB_CHARS {
                return (title, text);
            }
        }
    }

    let text = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next())
        .map(|body| visible_text(body, HIDDEN_TAGS))
        .unwrap_or_else(|| visible_text(document.root_element(), HIDDEN_TAGS));
    (title, text)
}

fn page_title(document: &Html) -> Option<String> {
    let og = Selector::parse("meta[property='og:title']")
        .ok()
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("content"))
        .map(|t| t.trim().to_string());
    let title = Selector::parse("title")
        .ok()
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string());
    title.filter(|t| !t.is_empty()).or(og.filter(|t| !t.is_empty()))
}

/// Text nodes under `root`, skipping anything inside a `hidden` tag.
pub(crate) fn visible_text(root: ElementRef<'_>, hidden: &[&str]) -> String {
    let mut parts = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skip = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map_or(false, |e| hidden.contains(&e.name()))
        });
        if skip {
            continue;
        }
        let t = text.trim();
        if !t.is_empty() {
            parts.push(t);
        }
    }
    normalize_whitespace(&parts.join("\n"))
}

/// The PDF link most likely to be the full report.
pub fn find_report_link(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").ok()?;

    let mut best: Option<(usize, Url)> = None;
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href) else {
            continue;
        };
        if !is_pdf_url(&url) || !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        let label = format!("{} {}", anchor.text().collect::<String>(), href).to_lowercase();
        let score = 1 + REPORT_HINTS.iter().filter(|h| label.contains(*h)).count();
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, url));
        }
    }
    best.map(|(_, url)| url)
}
