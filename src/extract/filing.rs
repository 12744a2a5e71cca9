//! Regulatory filing resolution and extraction (SEC EDGAR).
//!
//! Identifiers are a CIK, a ticker from the built-in table, or any ticker or
//! company name found in EDGAR's ticker index (`company_tickers.json`).
//!
//! Resolution tries two independent routes to the latest filing of a form:
//! 1. the company's submissions JSON (`data.sec.gov/submissions/CIK##########.json`)
//! 2. browsing the company's archive directory listing
//!
//! Extraction then tries the direct HTML body, the inline-XBRL-unwrapped
//! document and the full-submission raw text, in that order, stopping at the
//! first result of at least `min_chars`.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::web::visible_text;
use crate::error::PipelineError;
use crate::fetch::Fetcher;
use crate::models::{ExtractedContent, ExtractionMethod};
use crate::source::{lookup_company, KNOWN_COMPANIES};
use crate::text::normalize_whitespace;

pub const SEC_DATA_BASE: &str = "https://data.sec.gov";
pub const SEC_ARCHIVE_BASE: &str = "https://www.sec.gov";
pub const COMPANY_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";

/// Archive folders inspected by the directory-browse route.
const DIRECTORY_SCAN_LIMIT: usize = 10;

const FILING_HIDDEN_TAGS: &[&str] = &["head", "script", "style", "noscript", "ix:header"];

/// A located filing document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilingLocator {
    /// CIK without leading zeros.
    pub cik: String,
    pub company_name: Option<String>,
    pub form: String,
    /// Dashed form, e.g. `0000320193-23-000106`.
    pub accession: String,
    pub filing_date: Option<String>,
    pub document_url: Url,
}

impl FilingLocator {
    /// Folder holding every file of this submission.
    pub fn folder_url(&self) -> String {
        format!(
            "{}/Archives/edgar/data/{}/{}",
            SEC_ARCHIVE_BASE,
            self.cik,
            self.accession.replace('-', "")
        )
    }

    /// Full submission as one text file.
    pub fn raw_text_url(&self) -> String {
        format!("{}/{}.txt", self.folder_url(), self.accession)
    }
}

/// A company listed in the EDGAR ticker index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyMatch {
    /// CIK without leading zeros.
    pub cik: String,
    pub ticker: String,
    pub name: String,
}

/// One row of the submissions JSON "recent" table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentFiling {
    pub accession: String,
    pub primary_document: Option<String>,
    pub filing_date: Option<String>,
}

fn supported_tickers() -> String {
    KNOWN_COMPANIES
        .iter()
        .map(|c| c.ticker)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map a ticker or CIK to an unpadded CIK.
pub fn resolve_cik(identifier: &str, form: &str) -> Result<String, PipelineError> {
    let id = identifier.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        let trimmed = id.trim_start_matches('0');
        return Ok(if trimmed.is_empty() { "0" } else { trimmed }.to_string());
    }
    lookup_company(id)
        .map(|c| c.cik_number().to_string())
        .ok_or_else(|| PipelineError::FilingNotFound {
            company: id.to_string(),
            form: form.to_string(),
            guidance: format!(
                "use a numeric CIK, a ticker or name listed on EDGAR, or one of: {}",
                supported_tickers()
            ),
        })
}

/// Entries of the ticker index in index order. The index is an object keyed
/// by position: `{"0": {"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."}}`.
pub fn parse_company_tickers(json: &Value) -> Vec<CompanyMatch> {
    let Some(entries) = json.as_object() else {
        return Vec::new();
    };
    let mut indexed: Vec<(u64, CompanyMatch)> = entries
        .iter()
        .filter_map(|(key, entry)| {
            let cik = match entry.get("cik_str")? {
                Value::Number(n) => n.as_u64()?.to_string(),
                Value::String(s) => s.trim_start_matches('0').to_string(),
                _ => return None,
            };
            let company = CompanyMatch {
                cik,
                ticker: entry.get("ticker")?.as_str()?.to_string(),
                name: entry.get("title")?.as_str()?.to_string(),
            };
            Some((key.parse().unwrap_or(u64::MAX), company))
        })
        .collect();
    indexed.sort_by_key(|(position, _)| *position);
    indexed.into_iter().map(|(_, company)| company).collect()
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best matches for `query`: exact ticker, then exact name, then names
/// starting with it, then names containing it. Ties keep index order.
pub fn rank_companies(companies: &[CompanyMatch], query: &str, limit: usize) -> Vec<CompanyMatch> {
    let wanted = normalize_name(query);
    if wanted.is_empty() {
        return Vec::new();
    }
    let mut ranked: Vec<(u8, usize)> = companies
        .iter()
        .enumerate()
        .filter_map(|(i, company)| {
            let name = normalize_name(&company.name);
            let rank = if company.ticker.eq_ignore_ascii_case(query.trim()) {
                0
            } else if name == wanted {
                1
            } else if name.starts_with(&format!("{} ", wanted)) {
                2
            } else if name.contains(&wanted) {
                3
            } else {
                return None;
            };
            Some((rank, i))
        })
        .collect();
    ranked.sort();
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, i)| companies[i].clone())
        .collect()
}

/// Search the EDGAR ticker index by ticker or company name.
pub async fn search_company(
    fetcher: &dyn Fetcher,
    query: &str,
    limit: usize,
) -> Result<Vec<CompanyMatch>, PipelineError> {
    let json = fetch_json(fetcher, COMPANY_TICKERS_URL)
        .await
        .map_err(|e| PipelineError::Extraction(format!("company index unavailable: {:#}", e)))?;
    let matches = rank_companies(&parse_company_tickers(&json), query, limit);
    debug!(query, matches = matches.len(), "Searched company index");
    Ok(matches)
}

/// Most recent filing of `form` in a submissions JSON document.
pub fn parse_submissions(json: &Value, form: &str) -> Option<RecentFiling> {
    let recent = json.pointer("/filings/recent")?;
    let column = |name: &str| recent.get(name).and_then(Value::as_array);
    let forms = column("form")?;
    let accessions = column("accessionNumber")?;
    let documents = column("primaryDocument");
    let dates = column("filingDate");

    let idx = forms.iter().position(|f| f.as_str() == Some(form))?;
    let accession = accessions.get(idx)?.as_str()?.to_string();
    let text_at = |col: Option<&Vec<Value>>| {
        col.and_then(|c| c.get(idx))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(RecentFiling {
        accession,
        primary_document: text_at(documents),
        filing_date: text_at(dates),
    })
}

/// Accession folder names from an archive `index.json`, newest first.
pub fn parse_directory_listing(json: &Value) -> Vec<String> {
    let Some(items) = json.pointer("/directory/item").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut folders: Vec<(String, String)> = items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?;
            if name.len() != 18 || !name.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let modified = item
                .get("last-modified")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            Some((modified, name.to_string()))
        })
        .collect();
    folders.sort_by(|a, b| b.cmp(a));
    folders.into_iter().map(|(_, name)| name).collect()
}

/// `000032019323000106` → `0000320193-23-000106`.
pub fn dashed_accession(folder: &str) -> Option<String> {
    if folder.len() != 18 || !folder.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}-{}-{}", &folder[..10], &folder[10..12], &folder[12..]))
}

/// True when a filing index page describes a filing of `form`.
pub fn index_page_form_matches(html: &str, form: &str) -> bool {
    let document = Html::parse_document(html);
    let wanted = format!("form {}", form.to_lowercase());
    if let Ok(selector) = Selector::parse("#formName") {
        if let Some(el) = document.select(&selector).next() {
            let text = el.text().collect::<String>().to_lowercase();
            return text.split_whitespace().collect::<Vec<_>>().join(" ").starts_with(&wanted);
        }
    }
    let text = document.root_element().text().collect::<String>().to_lowercase();
    text.contains(&wanted)
}

/// The main document link on a filing index page.
///
/// Prefers the table row whose type column equals `form`, then any `.htm`
/// link that is not itself an index page.
pub fn find_document_link(html: &str, base: &Url, form: &str) -> Option<Url> {
    let document = Html::parse_document(html);
    let rows = Selector::parse("tr").ok()?;
    let cells = Selector::parse("td").ok()?;
    let links = Selector::parse("a[href]").ok()?;

    for row in document.select(&rows) {
        let is_form_row = row
            .select(&cells)
            .any(|td| td.text().collect::<String>().trim().eq_ignore_ascii_case(form));
        if !is_form_row {
            continue;
        }
        let href = row
            .select(&links)
            .filter_map(|a| a.value().attr("href"))
            .find(|h| !h.to_lowercase().contains("xbrl"));
        if let Some(url) = href.and_then(|h| base.join(h).ok()) {
            return Some(url);
        }
    }

    document
        .select(&links)
        .filter_map(|a| a.value().attr("href"))
        .filter(|h| {
            let lower = h.to_lowercase();
            (lower.ends_with(".htm") || lower.ends_with(".html")) && !lower.contains("index")
        })
        .find_map(|h| base.join(h).ok())
}

/// Rewrite an inline-XBRL viewer link to the underlying document.
pub fn unwrap_viewer_url(url: &Url) -> Url {
    if url.path() == "/ix" {
        if let Some((_, doc)) = url.query_pairs().find(|(k, _)| k == "doc") {
            if let Ok(direct) = url.join(&doc) {
                return direct;
            }
        }
    }
    url.clone()
}

async fn fetch_json(fetcher: &dyn Fetcher, url: &str) -> anyhow::Result<Value> {
    let url = Url::parse(url)?;
    let page = fetcher.fetch(&url).await?;
    Ok(serde_json::from_slice(&page.body)?)
}

async fn fetch_text(fetcher: &dyn Fetcher, url: &Url) -> anyhow::Result<String> {
    Ok(fetcher.fetch(url).await?.text())
}

/// Locate the latest `form` filing for a ticker or CIK.
pub async fn resolve_latest_filing(
    fetcher: &dyn Fetcher,
    identifier: &str,
    form: &str,
) -> Result<FilingLocator, PipelineError> {
    let (cik, known_name) = match resolve_cik(identifier, form) {
        Ok(cik) => (cik, lookup_company(identifier).map(|c| c.name.to_string())),
        Err(unresolved) => match search_company(fetcher, identifier, 1).await {
            Ok(found) => match found.into_iter().next() {
                Some(company) => {
                    info!(query = identifier, cik = %company.cik, name = %company.name, "Resolved company from ticker index");
                    (company.cik, Some(company.name))
                }
                None => return Err(unresolved),
            },
            Err(e) => {
                warn!(query = identifier, error = %e, "Company search failed");
                return Err(unresolved);
            }
        },
    };

    match via_submissions(fetcher, &cik, form).await {
        Ok(Some(mut locator)) => {
            if locator.company_name.is_none() {
                locator.company_name = known_name;
            }
            info!(cik = %cik, accession = %locator.accession, "Resolved filing from submissions index");
            return Ok(locator);
        }
        Ok(None) => debug!(cik = %cik, form, "No matching filing in submissions index"),
        Err(e) => warn!(cik = %cik, error = %e, "Submissions index unavailable"),
    }

    match via_directory(fetcher, &cik, form).await {
        Ok(Some(mut locator)) => {
            locator.company_name = known_name;
            info!(cik = %cik, accession = %locator.accession, "Resolved filing from archive directory");
            Ok(locator)
        }
        Ok(None) => Err(not_found(identifier, form)),
        Err(e) => {
            warn!(cik = %cik, error = %e, "Archive directory unavailable");
            Err(not_found(identifier, form))
        }
    }
}

fn not_found(identifier: &str, form: &str) -> PipelineError {
    PipelineError::FilingNotFound {
        company: identifier.trim().to_string(),
        form: form.to_string(),
        guidance: "check the identifier, or upload the filing as a PDF instead".to_string(),
    }
}

async fn via_submissions(
    fetcher: &dyn Fetcher,
    cik: &str,
    form: &str,
) -> anyhow::Result<Option<FilingLocator>> {
    let url = format!("{}/submissions/CIK{:0>10}.json", SEC_DATA_BASE, cik);
    let json = fetch_json(fetcher, &url).await?;
    let Some(recent) = parse_submissions(&json, form) else {
        return Ok(None);
    };

    let mut locator = FilingLocator {
        cik: cik.to_string(),
        company_name: json.get("name").and_then(Value::as_str).map(str::to_string),
        form: form.to_string(),
        accession: recent.accession.clone(),
        filing_date: recent.filing_date.clone(),
        document_url: Url::parse(SEC_ARCHIVE_BASE)?,
    };

    if let Some(primary) = &recent.primary_document {
        locator.document_url = Url::parse(&format!("{}/{}", locator.folder_url(), primary))?;
        return Ok(Some(locator));
    }

    let index_url = Url::parse(&format!(
        "{}/{}-index.htm",
        locator.folder_url(),
        locator.accession
    ))?;
    let html = fetch_text(fetcher, &index_url).await?;
    Ok(find_document_link(&html, &index_url, form).map(|doc| {
        locator.document_url = doc;
        locator
    }))
}

async fn via_directory(
    fetcher: &dyn Fetcher,
    cik: &str,
    form: &str,
) -> anyhow::Result<Option<FilingLocator>> {
    let listing_url = format!("{}/Archives/edgar/data/{}/index.json", SEC_ARCHIVE_BASE, cik);
    let listing = fetch_json(fetcher, &listing_url).await?;

    for folder in parse_directory_listing(&listing)
        .into_iter()
        .take(DIRECTORY_SCAN_LIMIT)
    {
        let Some(accession) = dashed_accession(&folder) else {
            continue;
        };
        let index_url = Url::parse(&format!(
            "{}/Archives/edgar/data/{}/{}/{}-index.htm",
            SEC_ARCHIVE_BASE, cik, folder, accession
        ))?;
        let html = match fetch_text(fetcher, &index_url).await {
            Ok(html) => html,
            Err(e) => {
                debug!(folder = %folder, error = %e, "Skipping unreadable filing index");
                continue;
            }
        };
        if !index_page_form_matches(&html, form) {
            continue;
        }
        if let Some(document_url) = find_document_link(&html, &index_url, form) {
            return Ok(Some(FilingLocator {
                cik: cik.to_string(),
                company_name: None,
                form: form.to_string(),
                accession,
                filing_date: None,
                document_url,
            }));
        }
    }
    Ok(None)
}

/// Visible body text of a filing document.
pub fn html_body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next())
        .unwrap_or_else(|| document.root_element());
    visible_text(root, FILING_HIDDEN_TAGS)
}

fn ix_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<ix:header>.*?</ix:header>").expect("static regex is valid")
    })
}

fn ix_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</?ix:[^>]*>").expect("static regex is valid"))
}

fn any_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script.*?</script>|<style.*?</style>|<[^>]+>")
            .expect("static regex is valid")
    })
}

/// Drop the inline-XBRL header and unwrap every `ix:` element, then read
/// the whole document's text.
pub fn inline_xbrl_text(html: &str) -> String {
    let without_header = ix_header_re().replace_all(html, " ");
    let unwrapped = ix_tag_re().replace_all(&without_header, "");
    let document = Html::parse_document(&unwrapped);
    visible_text(document.root_element(), FILING_HIDDEN_TAGS)
}

/// Tag-stripped text of a raw full-submission file.
pub fn raw_submission_text(raw: &str) -> String {
    let stripped = any_tag_re().replace_all(raw, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    normalize_whitespace(&decoded)
}

/// Extract the located filing's text, trying each format in order.
pub async fn extract_filing(
    fetcher: &dyn Fetcher,
    locator: &FilingLocator,
    min_chars: usize,
) -> Result<ExtractedContent, PipelineError> {
    let document_url = unwrap_viewer_url(&locator.document_url);
    let mut best = 0usize;

    match fetch_text(fetcher, &document_url).await {
        Ok(html) => {
            let direct = html_body_text(&html);
            best = best.max(direct.chars().count());
            if direct.chars().count() >= min_chars {
                return Ok(finish(direct, ExtractionMethod::FilingHtml, locator));
            }
            debug!(chars = direct.chars().count(), "Direct HTML too short, unwrapping inline XBRL");

            let unwrapped = inline_xbrl_text(&html);
            best = best.max(unwrapped.chars().count());
            if unwrapped.chars().count() >= min_chars {
                return Ok(finish(unwrapped, ExtractionMethod::FilingInlineXbrl, locator));
            }
        }
        Err(e) => warn!(url = %document_url, error = %e, "Filing document fetch failed"),
    }

    let raw_url = Url::parse(&locator.raw_text_url())
        .map_err(|e| PipelineError::Extraction(format!("bad raw text URL: {}", e)))?;
    match fetch_text(fetcher, &raw_url).await {
        Ok(raw) => {
            let text = raw_submission_text(&raw);
            best = best.max(text.chars().count());
            if text.chars().count() >= min_chars {
                return Ok(finish(text, ExtractionMethod::FilingRawText, locator));
            }
        }
        Err(e) => warn!(url = %raw_url, error = %e, "Raw submission fetch failed"),
    }

    Err(PipelineError::InsufficientContent {
        url: document_url.to_string(),
        chars: best,
        required: min_chars,
    })
}

fn finish(text: String, method: ExtractionMethod, locator: &FilingLocator) -> ExtractedContent {
    info!(method = ?method, chars = text.chars().count(), accession = %locator.accession, "Extracted filing");
    let mut content = ExtractedContent::new(text, method);
    content.source_title = locator
        .company_name
        .as_ref()
        .map(|name| format!("{} - Form {}", name, locator.form));
    content
}
