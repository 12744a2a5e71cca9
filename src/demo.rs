//! Demo mode: curated insight templates chosen by sector, zero backend calls.
//!
//! The sector is a coarse keyword classification of the document title and
//! company name. Unknown sectors fall back to technology.

use std::fmt;

use crate::cache::InsightMap;
use crate::categories::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sector {
    Tech,
    Financial,
    Healthcare,
    Retail,
    Manufacturing,
}

impl Sector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Tech => "tech",
            Sector::Financial => "financial",
            Sector::Healthcare => "healthcare",
            Sector::Retail => "retail",
            Sector::Manufacturing => "manufacturing",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Sector::Tech => "technology",
            Sector::Financial => "financial services",
            Sector::Healthcare => "healthcare",
            Sector::Retail => "retail",
            Sector::Manufacturing => "manufacturing",
        }
    }

    /// First sector in table order whose keywords appear in `text`.
    pub fn detect(text: &str) -> Option<Sector> {
        let lower = text.to_lowercase();
        SECTOR_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|(sector, _)| *sector)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked in order; financial goes first so "Bank of ... Technologies" is
/// still a bank.
pub const SECTOR_KEYWORDS: &[(Sector, &[&str])] = &[
    (
        Sector::Financial,
        &[
            "bank", "bancorp", "financial", "insurance", "capital", "credit", "lending",
            "asset management", "securities",
        ],
    ),
    (
        Sector::Healthcare,
        &[
            "health", "pharma", "therapeutic", "biotech", "medical", "clinical", "bio",
        ],
    ),
    (
        Sector::Retail,
        &["retail", "store", "mart", "shop", "apparel", "grocery", "merchandise"],
    ),
    (
        Sector::Manufacturing,
        &[
            "manufactur", "industrial", "motors", "steel", "equipment", "machinery", "aerospace",
        ],
    ),
    (
        Sector::Tech,
        &[
            "tech", "software", "semiconductor", "computer", "digital", "cloud", "platform",
            "systems", "micro",
        ],
    ),
];

/// Sector for a document, from its title and company name.
pub fn classify_sector(title: Option<&str>, company_name: Option<&str>) -> Sector {
    let text = format!("{} {}", title.unwrap_or_default(), company_name.unwrap_or_default());
    Sector::detect(&text).unwrap_or(Sector::Tech)
}

/// Template insights for every requested category.
pub fn demo_insights(sector: Sector, categories: &[Category]) -> InsightMap {
    tracing::info!(sector = %sector, categories = categories.len(), "Serving demo insights");
    categories
        .iter()
        .map(|&category| (category, template(sector, category)))
        .collect()
}

fn template(sector: Sector, category: Category) -> String {
    let body = match (sector, category) {
        (Sector::Tech, Category::BusinessSummary) => {
            "<p>This technology company develops hardware, software and online services sold to \
             consumers and businesses worldwide. Revenue comes from device sales, cloud \
             subscriptions and digital content distribution.</p>"
        }
        (Sector::Tech, Category::Moat) => {
            "<h4>Type of Moat: Brand Value + Ecosystem Lock-in</h4><ul><li><strong>Brand:</strong> \
             premium pricing and high customer loyalty.</li><li><strong>Ecosystem:</strong> \
             integrated products raise switching costs for customers who own several of them.</li></ul>"
        }
        (Sector::Tech, Category::Financial) => {
            "<ul><li><strong>Revenue Growth:</strong> 8% year over year.</li><li><strong>Operating \
             Margin:</strong> about 30%.</li><li><strong>Balance Sheet:</strong> cash and securities \
             exceed long-term debt.</li><li><strong>Capital Allocation:</strong> steady buybacks and a \
             growing dividend.</li></ul>"
        }
        (Sector::Tech, Category::Management) => {
            "<p>Leadership has a long record of product execution and communicates its technology \
             roadmap clearly. Guidance has generally been met or exceeded.</p>"
        }
        (Sector::Financial, Category::BusinessSummary) => {
            "<p>This bank provides retail and commercial banking, wealth management and lending \
             through a national branch network and digital channels. Net interest income is the \
             largest revenue source, followed by fee income.</p>"
        }
        (Sector::Financial, Category::Moat) => {
            "<h4>Type of Moat: Low-Cost Deposits + Scale</h4><ul><li><strong>Deposit Franchise:</strong> \
             sticky core deposits fund lending below market rates.</li><li><strong>Regulatory \
             Barriers:</strong> charters and capital rules limit new entrants.</li></ul>"
        }
        (Sector::Financial, Category::Financial) => {
            "<ul><li><strong>Net Interest Margin:</strong> 2.9%, stable over the year.</li><li><strong>CET1 \
             Ratio:</strong> 12.1%, well above the regulatory minimum.</li><li><strong>Credit \
             Quality:</strong> charge-offs remain below the ten-year average.</li><li><strong>Return on \
             Equity:</strong> 13%.</li></ul>"
        }
        (Sector::Financial, Category::Management) => {
            "<p>Management emphasizes conservative underwriting and has kept credit losses low \
             through the cycle. Capital returns are paced to stress-test results.</p>"
        }
        (Sector::Healthcare, Category::BusinessSummary) => {
            "<p>This healthcare company researches, manufactures and markets prescription drugs \
             and medical devices. Sales are concentrated in oncology, immunology and cardiology.</p>"
        }
        (Sector::Healthcare, Category::Moat) => {
            "<h4>Type of Moat: Patents + Regulatory Approval</h4><ul><li><strong>Patent \
             Protection:</strong> key products are protected into the next decade.</li><li><strong>Approval \
             Barriers:</strong> clinical trial requirements slow competing entrants.</li></ul>"
        }
        (Sector::Healthcare, Category::Financial) => {
            "<ul><li><strong>Revenue Growth:</strong> 6% year over year.</li><li><strong>R&amp;D \
             Spend:</strong> 18% of revenue.</li><li><strong>Free Cash Flow:</strong> covers the dividend \
             twice over.</li></ul>"
        }
        (Sector::Healthcare, Category::Management) => {
            "<p>Management has rebuilt the pipeline through targeted acquisitions and is candid \
             about upcoming patent expirations.</p>"
        }
        (Sector::Retail, Category::BusinessSummary) => {
            "<p>This retailer sells general merchandise and groceries through large-format stores \
             and an e-commerce platform. Membership fees provide a recurring income stream.</p>"
        }
        (Sector::Retail, Category::Moat) => {
            "<h4>Type of Moat: Cost Advantage</h4><ul><li><strong>Purchasing Scale:</strong> volume \
             buying lowers unit costs below competitors.</li><li><strong>Logistics:</strong> owned \
             distribution network shortens replenishment cycles.</li></ul>"
        }
        (Sector::Retail, Category::Financial) => {
            "<ul><li><strong>Comparable Sales:</strong> up 4%.</li><li><strong>Operating Margin:</strong> \
             thin at about 3.5%, typical for the segment.</li><li><strong>Inventory Turnover:</strong> \
             improved to 8.9 times.</li></ul>"
        }
        (Sector::Retail, Category::Management) => {
            "<p>Management focuses on everyday low prices and has invested steadily in online \
             fulfilment without sacrificing store productivity.</p>"
        }
        (Sector::Manufacturing, Category::BusinessSummary) => {
            "<p>This manufacturer designs and produces industrial equipment and components for \
             aerospace, automotive, energy and construction customers, plus aftermarket parts \
             and services.</p>"
        }
        (Sector::Manufacturing, Category::Moat) => {
            "<h4>Type of Moat: Installed Base + Switching Costs</h4><ul><li><strong>Aftermarket:</strong> \
             a large installed base drives recurring parts revenue.</li><li><strong>Certification:</strong> \
             qualified components are costly for customers to replace.</li></ul>"
        }
        (Sector::Manufacturing, Category::Financial) => {
            "<ul><li><strong>Revenue Growth:</strong> 5% year over year.</li><li><strong>Backlog:</strong> \
             equal to about 14 months of sales.</li><li><strong>Leverage:</strong> net debt at 1.8x \
             EBITDA.</li></ul>"
        }
        (Sector::Manufacturing, Category::Management) => {
            "<p>Management runs a disciplined cost program and allocates capital toward higher-margin \
             service lines.</p>"
        }
        _ => return generic_template(sector, category),
    };
    format!("<h3>{}</h3>{}", category.display_name(), body)
}

fn generic_template(sector: Sector, category: Category) -> String {
    let body = match category {
        Category::RedFlags => format!(
            "<ul><li><strong>Customer Concentration</strong> (Severity: Medium): a handful of \
             customers account for a large share of {} revenue.</li><li><strong>Rising \
             Leverage</strong> (Severity: Low): debt grew faster than operating income.</li></ul>",
            sector.label()
        ),
        Category::MarginOfSafety => {
            "<p>At the demo price the shares trade at roughly 18x normalized earnings against an \
             estimated intrinsic value about 20% higher, a moderate margin of safety.</p>"
                .to_string()
        }
        Category::MoatAnalysis => format!(
            "<p>The moat looks durable for a {} business: returns on capital have stayed above \
             the cost of capital for a decade.</p>",
            sector.label()
        ),
        Category::BuffettAnalysis => {
            "<p>The business is understandable, has favorable long-term economics and is run by \
             capable, shareholder-minded managers. Price is the open question.</p>"
                .to_string()
        }
        Category::BiotechAnalysis => {
            "<p>Pipeline value rests on two late-stage candidates. Cash runway covers roughly \
             three years of planned trials.</p>"
                .to_string()
        }
        _ => format!(
            "<p>Sample {} analysis for a {} company. Submit without demo mode for a generated \
             assessment.</p>",
            category.display_name().to_lowercase(),
            sector.label()
        ),
    };
    format!("<h3>{}</h3>{}", category.display_name(), body)
}
