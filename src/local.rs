//! Local mode: rule-based keyword analysis with no backend calls.
//!
//! Each category is a table of cues. A cue looks for the first of its
//! terms and quotes a context window around it (50 chars before, 100 or
//! 150 after). Moat signals are presence checks only.

use crate::cache::InsightMap;
use crate::categories::Category;
use crate::demo::Sector;
use crate::text::char_slice;

const CONTEXT_BEFORE: usize = 50;
const SHORT_AFTER: usize = 100;
const LONG_AFTER: usize = 150;

struct Cue {
    label: &'static str,
    terms: &'static [&'static str],
    after: usize,
}

const FINANCIAL_CUES: &[Cue] = &[
    Cue {
        label: "Revenue",
        terms: &["revenue", "sales", "turnover"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Profitability",
        terms: &["profit", "earnings", "net income", "ebitda", "margin"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Debt",
        terms: &["debt", "leverage", "loan", "borrowing", "liabilit"],
        after: SHORT_AFTER,
    },
];

const MANAGEMENT_CUES: &[Cue] = &[
    Cue {
        label: "Leadership",
        terms: &[
            "ceo", "chief executive", "president", "chairman", "director", "leadership",
            "management team",
        ],
        after: LONG_AFTER,
    },
    Cue {
        label: "Strategy",
        terms: &["strategy", "vision", "mission", "goal", "plan", "objective"],
        after: LONG_AFTER,
    },
];

const VALUATION_CUES: &[Cue] = &[
    Cue {
        label: "Cash Generation",
        terms: &["free cash flow", "cash flow from operations", "operating cash flow"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Book Value",
        terms: &["book value", "stockholders' equity", "shareholders' equity"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Shareholder Returns",
        terms: &["repurchase", "buyback", "dividend"],
        after: SHORT_AFTER,
    },
];

const OWNER_CUES: &[Cue] = &[
    Cue {
        label: "Returns on Capital",
        terms: &["return on equity", "return on invested capital", "return on capital"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Competitive Position",
        terms: &["competition", "competitive", "market share"],
        after: LONG_AFTER,
    },
    Cue {
        label: "Capital Allocation",
        terms: &["acquisition", "repurchase", "capital expenditure"],
        after: SHORT_AFTER,
    },
];

const TECH_CUES: &[Cue] = &[
    Cue {
        label: "R&D",
        terms: &["research and development"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Recurring Revenue",
        terms: &["subscription", "recurring", "cloud"],
        after: SHORT_AFTER,
    },
];

const BANK_CUES: &[Cue] = &[
    Cue {
        label: "Net Interest Income",
        terms: &["net interest"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Capital",
        terms: &["tier 1", "cet1", "capital ratio"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Credit Quality",
        terms: &["allowance for credit", "loan loss", "charge-off", "nonperforming"],
        after: SHORT_AFTER,
    },
];

const HEALTHCARE_CUES: &[Cue] = &[
    Cue {
        label: "Regulatory",
        terms: &["fda", "approval", "reimbursement"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Patents",
        terms: &["patent", "exclusivity"],
        after: SHORT_AFTER,
    },
];

const RETAIL_CUES: &[Cue] = &[
    Cue {
        label: "Comparable Sales",
        terms: &["comparable sales", "same-store", "comparable store"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "Inventory",
        terms: &["inventory", "inventories"],
        after: SHORT_AFTER,
    },
    Cue {
        label: "E-commerce",
        terms: &["e-commerce", "ecommerce", "online sales", "digital sales"],
        after: SHORT_AFTER,
    },
];

const BIOTECH_CUES: &[Cue] = &[
    Cue {
        label: "Pipeline",
        terms: &["phase 3", "phase iii", "phase 2", "phase ii", "pipeline"],
        after: LONG_AFTER,
    },
    Cue {
        label: "Cash Runway",
        terms: &["sufficient to fund", "cash runway", "cash, cash equivalents"],
        after: LONG_AFTER,
    },
];

const MOAT_SIGNALS: &[(&str, &[&str], &str)] = &[
    (
        "Brand Advantage",
        &["brand", "reputation", "recognition", "loyalty"],
        "The company appears to have brand recognition or customer loyalty.",
    ),
    (
        "Network Effects",
        &["network effect", "platform advantage", "user base", "marketplace"],
        "The company may benefit from network effects through its platform or user base.",
    ),
    (
        "Intellectual Property",
        &["patent", "intellectual property", "trademark", "proprietary", "copyright"],
        "The company has patents or other intellectual property protections.",
    ),
    (
        "Scale Advantage",
        &["economies of scale", "scale advantage", "market share", "largest", "leading"],
        "The company benefits from economies of scale or market leadership.",
    ),
    (
        "Switching Costs",
        &["switching cost", "lock-in", "retention", "recurring", "subscription"],
        "Customers face costs or difficulties in switching to competitors.",
    ),
    (
        "Regulatory Advantages",
        &["regulation", "compliance", "license", "permit", "regulatory"],
        "The company benefits from regulatory barriers to entry.",
    ),
];

/// Risk terms and the severity they imply.
const RISK_TERMS: &[(&str, &str)] = &[
    ("going concern", "High"),
    ("substantial doubt", "High"),
    ("material weakness", "High"),
    ("restatement", "High"),
    ("impairment", "Medium"),
    ("litigation", "Medium"),
    ("investigation", "Medium"),
    ("covenant", "Medium"),
    ("default", "Medium"),
    ("customer concentration", "Low"),
    ("related party", "Low"),
];

/// Rule-based insights for every requested category.
pub fn local_insights(content: &str, categories: &[Category]) -> InsightMap {
    tracing::info!(chars = content.len(), "Running local rule-based analysis");
    let doc = Doc::new(content);
    categories
        .iter()
        .map(|&category| {
            let body = match category {
                Category::BusinessSummary => business_summary(&doc),
                Category::Moat | Category::MoatAnalysis => moat_signals(&doc),
                Category::Financial => doc.cue_list(FINANCIAL_CUES),
                Category::Management => doc.cue_list(MANAGEMENT_CUES),
                Category::RedFlags => red_flags(&doc),
                Category::MarginOfSafety => doc.cue_list(VALUATION_CUES),
                Category::BuffettAnalysis => doc.cue_list(OWNER_CUES),
                Category::BiotechAnalysis => doc.cue_list(BIOTECH_CUES),
                Category::TechIndustry => doc.cue_list(TECH_CUES),
                Category::FinancialIndustry => doc.cue_list(BANK_CUES),
                Category::HealthcareIndustry => doc.cue_list(HEALTHCARE_CUES),
                Category::RetailIndustry => doc.cue_list(RETAIL_CUES),
            };
            (category, format!("<h3>{}</h3>{}", category.display_name(), body))
        })
        .collect()
}

struct Doc<'a> {
    content: &'a str,
    /// ASCII-lowercased copy; byte offsets line up with `content`.
    lower: String,
}

impl<'a> Doc<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            content,
            lower: content.to_ascii_lowercase(),
        }
    }

    fn has_any(&self, terms: &[&str]) -> bool {
        terms.iter().any(|t| self.lower.contains(t))
    }

    /// Quoted text around the first occurrence of `term`.
    fn context(&self, term: &str, after: usize) -> Option<String> {
        let byte = self.lower.find(term)?;
        let at = self.content[..byte].chars().count();
        let window = char_slice(
            self.content,
            at.saturating_sub(CONTEXT_BEFORE),
            at + after,
        );
        Some(escape(&crate::text::normalize_whitespace(window).replace('\n', " ")))
    }

    fn cue_list(&self, cues: &[Cue]) -> String {
        let mut out = String::from("<p>Indicators extracted from the document:</p><ul>");
        for cue in cues {
            let found = cue
                .terms
                .iter()
                .find_map(|term| self.context(term, cue.after));
            match found {
                Some(context) => out.push_str(&format!(
                    "<li><strong>{}:</strong> Mentioned in the document. Context: \"{}\"</li>",
                    cue.label, context
                )),
                None => out.push_str(&format!(
                    "<li><strong>{}:</strong> No specific information found.</li>",
                    cue.label
                )),
            }
        }
        out.push_str("</ul>");
        out
    }
}

fn business_summary(doc: &Doc<'_>) -> String {
    let mut out = String::from("<p>Based on document analysis, this company ");
    match Sector::detect(&doc.lower) {
        Some(Sector::Tech) => {
            out.push_str("appears to operate in the technology sector, ");
            out.push_str(if doc.lower.contains("software") {
                "developing software products"
            } else if doc.lower.contains("hardware") {
                "producing hardware devices"
            } else {
                "providing technology solutions"
            });
        }
        Some(Sector::Financial) => {
            out.push_str("operates in the financial services industry, ");
            out.push_str(if doc.lower.contains("bank") {
                "offering banking services"
            } else if doc.lower.contains("insurance") {
                "providing insurance products"
            } else {
                "delivering financial services"
            });
        }
        Some(Sector::Healthcare) => out.push_str("operates in healthcare, developing medical products"),
        Some(Sector::Retail) => out.push_str("is in the retail sector, selling consumer products"),
        Some(Sector::Manufacturing) => {
            out.push_str("is involved in manufacturing, producing industrial goods")
        }
        None => out.push_str("operates across multiple sectors"),
    }
    out.push_str(".</p>");

    if doc.has_any(&["customer", "client"]) {
        let segment = if doc.has_any(&["consumer", "individual", "retail customer"]) {
            "individual consumers"
        } else if doc.has_any(&["business", "enterprise", "corporate"]) {
            "business clients"
        } else if doc.has_any(&["government", "public sector"]) {
            "government entities"
        } else {
            "various customer segments"
        };
        out.push_str(&format!("<p>The company serves {}.</p>", segment));
    }
    out
}

fn moat_signals(doc: &Doc<'_>) -> String {
    let mut out = String::from("<p>Potential competitive advantages identified in the document:</p><ul>");
    let mut found = false;
    for (label, terms, note) in MOAT_SIGNALS {
        if doc.has_any(terms) {
            out.push_str(&format!("<li><strong>{}:</strong> {}</li>", label, note));
            found = true;
        }
    }
    if !found {
        out.push_str("<li>No clear competitive advantages were identified in the document.</li>");
    }
    out.push_str("</ul>");
    out
}

fn red_flags(doc: &Doc<'_>) -> String {
    let mut out = String::from("<p>Risk terms found in the document:</p><ul>");
    let mut found = false;
    for (term, severity) in RISK_TERMS {
        if let Some(context) = doc.context(term, SHORT_AFTER) {
            out.push_str(&format!(
                "<li><strong>{}</strong> (Severity: {}): \"{}\"</li>",
                term, severity, context
            ));
            found = true;
        }
    }
    if !found {
        out.push_str("<li>No common risk terms were found.</li>");
    }
    out.push_str("</ul>");
    out
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::BASE_CATEGORIES;
    use crate::models::Severity;

    const SAMPLE: &str = "Acme Software Inc. sells subscription software to enterprise customers. \
        Total revenue was $4.2 billion, up 12% from the prior year. Net income reached $610 million. \
        Long-term debt stood at $1.1 billion. Our CEO, Jane Roe, has led the company since 2015. \
        Our strategy is to expand the platform internationally. The auditor identified a material \
        weakness in internal controls over revenue recognition.";

    #[test]
    fn base_categories_are_filled() {
        let insights = local_insights(SAMPLE, &BASE_CATEGORIES);
        assert_eq!(insights.len(), 4);
        assert!(insights[&Category::BusinessSummary].contains("developing software products"));
        assert!(insights[&Category::BusinessSummary].contains("business clients"));
        assert!(insights[&Category::Moat].contains("Switching Costs"));
        assert!(insights[&Category::Financial].contains("$4.2 billion"));
        assert!(insights[&Category::Management].contains("Jane Roe"));
    }

    #[test]
    fn context_window_is_bounded() {
        let doc = Doc::new(SAMPLE);
        let context = doc.context("revenue", SHORT_AFTER).unwrap();
        assert!(context.chars().count() <= CONTEXT_BEFORE + SHORT_AFTER);
        assert!(context.contains("Total revenue was"));
    }

    #[test]
    fn red_flags_carry_severity() {
        let insights = local_insights(SAMPLE, &[Category::RedFlags]);
        let text = &insights[&Category::RedFlags];
        assert!(text.contains("material weakness"));
        assert_eq!(Severity::detect(text), Some(Severity::High));
    }

    #[test]
    fn missing_terms_are_reported() {
        let insights = local_insights("Nothing relevant here at all.", &[Category::Financial, Category::Moat]);
        assert!(insights[&Category::Financial].contains("No specific information found"));
        assert!(insights[&Category::Moat].contains("No clear competitive advantages"));
    }

    #[test]
    fn non_ascii_content_is_safe() {
        let text = "Umsatz für das Geschäftsjahr: revenue €3,5 Mrd. — débt free";
        let insights = local_insights(text, &[Category::Financial]);
        assert!(insights[&Category::Financial].contains("revenue €3,5"));
    }
}
