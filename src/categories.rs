//! Insight category catalog, prompt templates, and the category rule table.
//!
//! Category selection is declarative: the four base categories are always
//! requested, and [`CATEGORY_RULES`] adds more based on the document's
//! processing options. Rules are evaluated once per job.

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;
use crate::models::ProcessingOptions;

/// Bumped whenever any template below changes, so old cache entries stop matching.
pub const PROMPT_TEMPLATE_VERSION: &str = "2";

/// Named analysis dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    BusinessSummary,
    Moat,
    Financial,
    Management,
    MoatAnalysis,
    RedFlags,
    MarginOfSafety,
    BuffettAnalysis,
    BiotechAnalysis,
    TechIndustry,
    FinancialIndustry,
    HealthcareIndustry,
    RetailIndustry,
}

pub const BASE_CATEGORIES: [Category; 4] = [
    Category::BusinessSummary,
    Category::Moat,
    Category::Financial,
    Category::Management,
];

pub const ALL_CATEGORIES: [Category; 13] = [
    Category::BusinessSummary,
    Category::Moat,
    Category::Financial,
    Category::Management,
    Category::MoatAnalysis,
    Category::RedFlags,
    Category::MarginOfSafety,
    Category::BuffettAnalysis,
    Category::BiotechAnalysis,
    Category::TechIndustry,
    Category::FinancialIndustry,
    Category::HealthcareIndustry,
    Category::RetailIndustry,
];

impl Category {
    /// Storage key.
    pub fn key(&self) -> &'static str {
        match self {
            Category::BusinessSummary => "business_summary",
            Category::Moat => "moat",
            Category::Financial => "financial",
            Category::Management => "management",
            Category::MoatAnalysis => "moat_analysis",
            Category::RedFlags => "red_flags",
            Category::MarginOfSafety => "margin_of_safety",
            Category::BuffettAnalysis => "buffett_analysis",
            Category::BiotechAnalysis => "biotech_analysis",
            Category::TechIndustry => "tech_industry_analysis",
            Category::FinancialIndustry => "financial_industry_analysis",
            Category::HealthcareIndustry => "healthcare_industry_analysis",
            Category::RetailIndustry => "retail_industry_analysis",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::BusinessSummary => "Business Summary",
            Category::Moat => "Competitive Advantage",
            Category::Financial => "Financial Health",
            Category::Management => "Management Quality",
            Category::MoatAnalysis => "Moat Analysis",
            Category::RedFlags => "Red Flags",
            Category::MarginOfSafety => "Margin of Safety",
            Category::BuffettAnalysis => "Buffett-Style Analysis",
            Category::BiotechAnalysis => "Biotech Analysis",
            Category::TechIndustry => "Technology Industry Analysis",
            Category::FinancialIndustry => "Financial Industry Analysis",
            Category::HealthcareIndustry => "Healthcare Industry Analysis",
            Category::RetailIndustry => "Retail Industry Analysis",
        }
    }

    /// Prompt template; `{content}` is replaced with the document text.
    pub fn template(&self) -> &'static str {
        match self {
            Category::BusinessSummary => TEMPLATE_BUSINESS_SUMMARY,
            Category::Moat => TEMPLATE_MOAT,
            Category::Financial => TEMPLATE_FINANCIAL,
            Category::Management => TEMPLATE_MANAGEMENT,
            Category::MoatAnalysis => TEMPLATE_MOAT_ANALYSIS,
            Category::RedFlags => TEMPLATE_RED_FLAGS,
            Category::MarginOfSafety => TEMPLATE_MARGIN_OF_SAFETY,
            Category::BuffettAnalysis => TEMPLATE_BUFFETT,
            Category::BiotechAnalysis => TEMPLATE_BIOTECH,
            Category::TechIndustry => TEMPLATE_TECH_INDUSTRY,
            Category::FinancialIndustry => TEMPLATE_FINANCIAL_INDUSTRY,
            Category::HealthcareIndustry => TEMPLATE_HEALTHCARE_INDUSTRY,
            Category::RetailIndustry => TEMPLATE_RETAIL_INDUSTRY,
        }
    }

    pub fn render_prompt(&self, content: &str) -> String {
        self.template().replace("{content}", content)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_CATEGORIES
            .iter()
            .copied()
            .find(|c| c.key() == s)
            .ok_or_else(|| PipelineError::UnknownCategory(s.to_string()))
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

/// Predicate over processing options mapped to the categories it adds.
pub struct CategoryRule {
    pub name: &'static str,
    pub applies: fn(&ProcessingOptions) -> bool,
    pub adds: &'static [Category],
}

fn persona_is(options: &ProcessingOptions, lens: &str) -> bool {
    options
        .persona_lens
        .as_deref()
        .is_some_and(|p| p.eq_ignore_ascii_case(lens))
}

fn industry_is(options: &ProcessingOptions, hint: &str) -> bool {
    options
        .industry_hint
        .as_deref()
        .is_some_and(|h| h.eq_ignore_ascii_case(hint))
}

pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        name: "value lens",
        applies: |o| persona_is(o, "value"),
        adds: &[
            Category::MoatAnalysis,
            Category::MarginOfSafety,
            Category::RedFlags,
        ],
    },
    CategoryRule {
        name: "buffett lens",
        applies: |o| persona_is(o, "buffett"),
        adds: &[Category::BuffettAnalysis, Category::MarginOfSafety],
    },
    CategoryRule {
        name: "forensic lens",
        applies: |o| persona_is(o, "forensic"),
        adds: &[Category::RedFlags],
    },
    CategoryRule {
        name: "tech industry",
        applies: |o| industry_is(o, "tech"),
        adds: &[Category::TechIndustry],
    },
    CategoryRule {
        name: "financial industry",
        applies: |o| industry_is(o, "financial"),
        adds: &[Category::FinancialIndustry],
    },
    CategoryRule {
        name: "healthcare industry",
        applies: |o| industry_is(o, "healthcare"),
        adds: &[Category::HealthcareIndustry],
    },
    CategoryRule {
        name: "retail industry",
        applies: |o| industry_is(o, "retail"),
        adds: &[Category::RetailIndustry],
    },
    CategoryRule {
        name: "biotech industry",
        applies: |o| industry_is(o, "biotech"),
        adds: &[Category::BiotechAnalysis, Category::HealthcareIndustry],
    },
];

/// Base categories plus everything the rule table adds, in catalog order.
pub fn select_categories(options: &ProcessingOptions) -> Vec<Category> {
    let mut selected: Vec<Category> = BASE_CATEGORIES.to_vec();
    for rule in CATEGORY_RULES {
        if (rule.applies)(options) {
            tracing::debug!(rule = rule.name, "category rule matched");
            selected.extend_from_slice(rule.adds);
        }
    }
    selected.sort();
    selected.dedup();
    selected
}

/// Hash over the template version and every template, in catalog order.
pub fn prompt_set_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(PROMPT_TEMPLATE_VERSION.as_bytes());
    for category in ALL_CATEGORIES {
        hasher.update(category.key().as_bytes());
        hasher.update(category.template().as_bytes());
    }
    hex::encode(hasher.finalize())
}

const TEMPLATE_BUSINESS_SUMMARY: &str = "You are an expert business analyst reviewing a company document.

Explain the company's business model in plain language: what it sells or builds, who its customers are, which industry it operates in, and which problem it solves.

Respond with concise, well-structured HTML. Stick to facts stated in the document.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_MOAT: &str = "You are a value investor assessing competitive advantages.

Decide whether the company has a durable competitive advantage (moat): brand, network effects, intellectual property, cost advantage, switching costs, or regulatory barriers.

Respond in HTML with three sections: Type of Moat (or None Detected), Justification (2-3 sentences), Supporting Evidence (quote the document where possible). Say so plainly if no moat is evident.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_FINANCIAL: &str = "You are a financial analyst reviewing company documents.

Extract 3-5 key financial signals: revenue trend, debt levels, profitability or free cash flow, returns on equity or assets, gross or operating margins.

Respond in HTML as a concise bullet list with specific numbers and trend direction. Note important metrics that are missing.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_MANAGEMENT: &str = "You are a governance expert evaluating company management.

From tone, quotes and stated facts, assess leadership track record, transparency, shareholder alignment, long-term orientation and compensation structure.

Respond in HTML with a concise assessment based only on the document. State clearly when the information is insufficient.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_MOAT_ANALYSIS: &str = "You are analyzing a company's economic moat through value investing principles.

Look for sustained high returns on capital, growing market share, unique assets or IP, pricing power, and customer loyalty.

Respond in HTML with sections <h4>Moat Classification</h4> (Wide, Narrow, or None), <h4>Moat Sources</h4>, <h4>Moat Stability</h4>, <h4>Quantitative Evidence</h4>, <h4>Competitive Threats</h4>. Explain concepts for a non-expert.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_RED_FLAGS: &str = "You are a forensic financial analyst looking for warning signs.

Look for aggressive accounting, unsustainable metrics, management credibility issues, disruption risks, balance sheet stress, and governance conflicts.

Respond in HTML as a list. For every red flag state its severity as 'Severity: High', 'Severity: Medium' or 'Severity: Low'. If none are found, say so.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_MARGIN_OF_SAFETY: &str = "You are a value investor estimating margin of safety.

Using figures in the document, discuss intrinsic value drivers (earnings power, asset value, growth durability), key valuation uncertainties, and what price discount would be prudent.

Respond in HTML with sections <h4>Intrinsic Value Drivers</h4>, <h4>Key Uncertainties</h4>, <h4>Margin of Safety Assessment</h4>. Flag missing data instead of inventing numbers.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_BUFFETT: &str = "You are evaluating a company the way Warren Buffett would.

Address: is the business understandable, does it have favorable long-term economics, is management able and trustworthy, and is the price likely sensible.

Respond in HTML with one section per question and a short overall verdict.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_BIOTECH: &str = "You are evaluating a biotech or pharmaceutical company for a value investor.

Assess the scientific foundation, clinical progress, regulatory pathway, commercial potential and cash runway. Separate proven results from speculative claims.

Respond in HTML with sections <h4>Scientific Foundation</h4>, <h4>Clinical Progress</h4>, <h4>Regulatory Pathway</h4>, <h4>Commercial Potential</h4>, <h4>Value Investor's Perspective</h4>.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_TECH_INDUSTRY: &str = "You are a technology industry expert.

Analyze R&D investment, proprietary technology and IP, engineering leadership, platform scalability and technical debt, and position in the adoption cycle.

Respond in HTML with sections <h4>Technology Foundation</h4>, <h4>Innovation Pipeline</h4>, <h4>Technical Competitive Position</h4>, <h4>Scalability & Technical Debt</h4>.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_FINANCIAL_INDUSTRY: &str = "You are a financial services industry expert.

Analyze asset quality and risk management, capital and liquidity, regulatory compliance, interest rate sensitivity, digital strategy, and fee versus interest income mix.

Respond in HTML with sections <h4>Asset Quality Assessment</h4>, <h4>Capital & Liquidity Position</h4>, <h4>Regulatory Compliance Status</h4>, <h4>Digital Banking Strategy</h4>, <h4>Revenue Diversification</h4>.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_HEALTHCARE_INDUSTRY: &str = "You are a healthcare industry expert.

Analyze the clinical pipeline, regulatory approvals, patent coverage and expirations, reimbursement and payer mix, efficacy data, and manufacturing capacity.

Respond in HTML with sections <h4>Clinical Pipeline Assessment</h4>, <h4>Regulatory Pathway Analysis</h4>, <h4>IP Strength & Longevity</h4>, <h4>Reimbursement & Market Access</h4>, <h4>Efficacy & Clinical Differentiation</h4>.

DOCUMENT CONTENT:
{content}
";

const TEMPLATE_RETAIL_INDUSTRY: &str = "You are a retail industry expert.

Analyze omnichannel integration, store economics and same-store sales, customer acquisition and lifetime value, inventory and supply chain, private label margins, and loyalty programs.

Respond in HTML with sections <h4>Omnichannel Strategy Assessment</h4>, <h4>Store Economics Analysis</h4>, <h4>Inventory & Supply Chain Management</h4>, <h4>Customer Economics</h4>, <h4>Margin Structure & Private Label</h4>.

DOCUMENT CONTENT:
{content}
";
