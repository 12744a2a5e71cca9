//! # InsightLens
//!
//! Turns uploaded PDFs, web pages and regulatory filings into categorized
//! investment insights using pluggable text-generation backends, under a
//! monthly cost budget.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────┐   ┌──────────────┐
//! │ Source       │──▶│ Extractors │──▶│ Budgeter │──▶│ Orchestrator │
//! │ file/url/CIK │   │ PDF/Web/SEC│   │          │   │ cache+ledger │
//! └──────────────┘   └────────────┘   └──────────┘   └──────┬───────┘
//!                                                          ▼
//!        ┌──────────┐      ┌──────────┐              ┌──────────┐
//!        │   CLI    │◀────▶│ Pipeline │─────────────▶│  SQLite  │
//!        │  (lens)  │      │ job FSM  │              │          │
//!        └──────────┘      └────┬─────┘              └──────────┘
//!                               ▼
//!                          ┌──────────┐
//!                          │   HTTP   │
//!                          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lens init
//! lens submit --persona value filing AAPL
//! lens submit --local url https://example.com/annual-report
//! lens usage
//! lens serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`source`] | Source resolution and metadata sniffing |
//! | [`fetch`] | HTTP fetching |
//! | [`extract`] | PDF, web and filing extractors |
//! | [`budget`] | Spend-aware content budgeting |
//! | [`categories`] | Insight catalog and selection rules |
//! | [`backend`] | Text-generation backends |
//! | [`orchestrator`] | Per-category generation with cache and fallback |
//! | [`demo`] | Demo-mode templates |
//! | [`local`] | Rule-based local analysis |
//! | [`compare`] | Cross-document comparison |
//! | [`cache`] | Two-tier response cache |
//! | [`ledger`] | Usage ledger and budget status |
//! | [`jobs`] | Processing job state machine |
//! | [`pipeline`] | Submission and background processing |
//! | [`store`] | Persistence trait and implementations |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backend;
pub mod budget;
pub mod cache;
pub mod categories;
pub mod compare;
pub mod config;
pub mod db;
pub mod demo;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod jobs;
pub mod ledger;
pub mod local;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
pub mod source;
pub mod store;
pub mod text;
