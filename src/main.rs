//! # InsightLens CLI (`lens`)
//!
//! Submits documents to the insight pipeline and inspects the results.
//!
//! ## Usage
//!
//! ```bash
//! lens --config ./config/lens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lens init` | Create the SQLite database and run schema migrations |
//! | `lens submit file <path>` | Analyze a PDF |
//! | `lens submit url <url>` | Analyze a web page or linked report |
//! | `lens submit filing <company>` | Analyze a company's latest filing |
//! | `lens status <id>` | Show job status |
//! | `lens cancel <id>` | Cancel a pending or running job |
//! | `lens regenerate <id> <category>` | Regenerate one insight |
//! | `lens insights <id>` | Print stored insights |
//! | `lens usage` | Monthly usage and budget |
//! | `lens filing <company>` | Locate the latest filing |
//! | `lens companies <query>` | Search EDGAR companies by ticker or name |
//! | `lens compare <id> <id>...` | Compare insights across documents |
//! | `lens cache stats` / `lens cache cleanup` | Response cache maintenance |
//! | `lens serve` | Start the JSON HTTP API |
//!
//! The CLI runs a submitted job in-process and waits for it to finish. Use
//! `lens serve` for fire-and-poll access.
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); command output goes to
//! stdout.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use insight_lens::categories::Category;
use insight_lens::config::{self, Config};
use insight_lens::jobs::CancelOutcome;
use insight_lens::migrate;
use insight_lens::models::{DocumentMetadata, DocumentRef, ProcessingOptions, SourceKind};
use insight_lens::pipeline::Pipeline;
use insight_lens::server;
use insight_lens::store::{SqliteStore, Store};

/// InsightLens: categorized investment insights from filings, reports and
/// web pages.
#[derive(Parser)]
#[command(name = "lens", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Submit a document and wait for its insights.
    Submit {
        #[command(subcommand)]
        source: SubmitSource,

        #[command(flatten)]
        options: SubmitOptions,
    },

    /// Show the processing status of a document.
    Status { id: String },

    /// Cancel a pending or processing job.
    Cancel { id: String },

    /// Regenerate one insight category for a document.
    Regenerate {
        id: String,
        /// Category key, e.g. `red_flags`.
        category: String,
    },

    /// Print the stored insights for a document.
    Insights { id: String },

    /// Show this month's backend usage and budget status.
    Usage,

    /// Locate the latest filing for a company (ticker, CIK or name).
    Filing { company: String },

    /// Search EDGAR's company index by ticker or name.
    Companies {
        query: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Compare the insights of two or more processed documents.
    Compare {
        #[arg(required = true, num_args = 2..)]
        ids: Vec<String>,
    },

    /// Response cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the JSON HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum SubmitSource {
    /// A local PDF file.
    File { path: PathBuf },
    /// A web page or report URL.
    Url { url: String },
    /// A company identifier: ticker, CIK or known name.
    Filing { company: String },
}

#[derive(Args)]
struct SubmitOptions {
    /// Serve curated sample insights; no extraction or backend calls.
    #[arg(long)]
    demo: bool,

    /// Rule-based analysis only; no backend calls.
    #[arg(long)]
    local: bool,

    /// Analysis lens: `value`, `buffett` or `forensic`.
    #[arg(long)]
    persona: Option<String>,

    /// Industry hint: `tech`, `financial`, `healthcare`, `retail` or `biotech`.
    #[arg(long)]
    industry: Option<String>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    company: Option<String>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry counts and durable-tier size.
    Stats,
    /// Remove durable entries older than the given age.
    Cleanup {
        #[arg(long)]
        max_age_days: Option<u32>,
    },
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }
    let pipeline = open_pipeline(&cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Submit { source, options } => submit(&pipeline, source, options).await?,
        Commands::Status { id } => {
            let job = pipeline.status(&id).await?;
            print_json(&job)?;
        }
        Commands::Cancel { id } => match pipeline.cancel(&id).await? {
            CancelOutcome::Cancelled => println!("Cancelled {}.", id),
            CancelOutcome::AlreadyCancelled => println!("{} was already cancelled.", id),
            CancelOutcome::Rejected(status) => {
                println!("Cannot cancel {}: job is {}.", id, status)
            }
        },
        Commands::Regenerate { id, category } => {
            let category: Category = category.parse()?;
            let record = pipeline.regenerate(&id, category).await?;
            print_json(&record)?;
        }
        Commands::Insights { id } => {
            let insights = pipeline.insights(&id).await?;
            print_json(&insights)?;
        }
        Commands::Usage => {
            let summary = pipeline.usage_summary().await?;
            print_json(&summary)?;
        }
        Commands::Filing { company } => {
            let locator = pipeline.resolve_latest_filing(&company).await?;
            print_json(&locator)?;
        }
        Commands::Companies { query, limit } => {
            let matches = pipeline.search_companies(&query, limit).await?;
            print_json(&matches)?;
        }
        Commands::Compare { ids } => {
            let comparison = pipeline.compare(&ids).await?;
            print_json(&comparison)?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => print_json(&pipeline.cache_stats().await)?,
            CacheAction::Cleanup { max_age_days } => {
                let removed = pipeline.cleanup_cache(max_age_days).await;
                println!("Removed {} cache entries.", removed);
            }
        },
        Commands::Serve => server::run_server(&cfg.server.bind, pipeline).await?,
    }

    Ok(())
}

async fn open_pipeline(cfg: &Config) -> anyhow::Result<Arc<Pipeline>> {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(cfg)
            .await
            .context("Failed to open database (run `lens init` first?)")?,
    );
    Ok(Arc::new(Pipeline::from_config(cfg, store)?))
}

async fn submit(
    pipeline: &Arc<Pipeline>,
    source: SubmitSource,
    options: SubmitOptions,
) -> anyhow::Result<()> {
    let (kind, locator) = match source {
        SubmitSource::File { path } => (SourceKind::File, path.display().to_string()),
        SubmitSource::Url { url } => (SourceKind::Url, url),
        SubmitSource::Filing { company } => (SourceKind::Filing, company),
    };
    let processing = ProcessingOptions {
        demo_mode: options.demo,
        local_only: options.local,
        persona_lens: options.persona,
        industry_hint: options.industry,
    };
    let doc = DocumentRef::new(kind, locator, processing).with_metadata(DocumentMetadata {
        title: options.title,
        company_name: options.company,
        filing_id: None,
    });

    let submission = pipeline.submit(doc).await?;
    println!("document: {}", submission.document_id);
    println!("job: {}", submission.job_id);

    let job = loop {
        let job = pipeline.status(&submission.document_id).await?;
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    println!("status: {}", job.status);
    if let Some(error) = &job.error {
        println!("error: {}", error);
    }

    for record in pipeline.insights(&submission.document_id).await? {
        let severity = record
            .severity
            .map(|s| format!(" [{}]", s.as_str()))
            .unwrap_or_default();
        println!("\n== {}{} ==\n{}", record.category.display_name(), severity, record.content);
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
