use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::BackendKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub budgeter: BudgeterConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: u64,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            memory_ttl_secs: default_memory_ttl_secs(),
            memory_capacity: default_memory_capacity(),
            max_age_days: default_max_age_days(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}
fn default_memory_ttl_secs() -> u64 {
    3600
}
fn default_memory_capacity() -> usize {
    100
}
fn default_max_age_days() -> u32 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    /// Monthly spend cap in USD.
    #[serde(default = "default_monthly_usd")]
    pub monthly_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_usd: default_monthly_usd(),
        }
    }
}

fn default_monthly_usd() -> f64 {
    20.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgeterConfig {
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
}

impl Default for BudgeterConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: default_max_input_tokens(),
        }
    }
}

fn default_max_input_tokens() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_max_pdf_workers")]
    pub max_pdf_workers: usize,
    #[serde(default = "default_max_web_chars")]
    pub max_web_chars: usize,
    #[serde(default = "default_min_filing_chars")]
    pub min_filing_chars: usize,
    #[serde(default = "default_filing_form")]
    pub filing_form: String,
    #[serde(default = "default_sec_user_agent")]
    pub sec_user_agent: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_pdf_workers: default_max_pdf_workers(),
            max_web_chars: default_max_web_chars(),
            min_filing_chars: default_min_filing_chars(),
            filing_form: default_filing_form(),
            sec_user_agent: default_sec_user_agent(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_max_pdf_workers() -> usize {
    4
}
fn default_max_web_chars() -> usize {
    100_000
}
fn default_min_filing_chars() -> usize {
    500
}
fn default_filing_form() -> String {
    "10-K".to_string()
}
fn default_sec_user_agent() -> String {
    "InsightLens Research Tool (contact@example.com)".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendsConfig {
    /// Provider name used for every category first.
    #[serde(default)]
    pub primary: Option<String>,
    /// Provider that takes over a category when the primary fails it.
    #[serde(default)]
    pub secondary: Option<String>,
    /// Cheap provider used by the budgeter to summarize oversized content.
    #[serde(default)]
    pub summarizer: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            primary: None,
            secondary: None,
            summarizer: None,
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            providers: BTreeMap::new(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff_ms() -> u64 {
    1000
}

/// One `[backends.providers.<name>]` table.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub kind: BackendKind,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub prompt_rate_per_1k: Option<f64>,
    #[serde(default)]
    pub completion_rate_per_1k: Option<f64>,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.5
}

/// Backend calls always carry a timeout between these bounds.
pub const MIN_BACKEND_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs).clamp(MIN_BACKEND_TIMEOUT, MAX_BACKEND_TIMEOUT)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

impl Config {
    /// Configuration with defaults everywhere and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            budgeter: BudgeterConfig::default(),
            extraction: ExtractionConfig::default(),
            backends: BackendsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.budget.monthly_usd <= 0.0 {
        anyhow::bail!("budget.monthly_usd must be > 0");
    }

    if config.budgeter.max_input_tokens == 0 {
        anyhow::bail!("budgeter.max_input_tokens must be > 0");
    }

    if config.extraction.max_pdf_workers == 0 {
        anyhow::bail!("extraction.max_pdf_workers must be > 0");
    }

    if config.backends.concurrency == 0 {
        anyhow::bail!("backends.concurrency must be > 0");
    }

    // Role names must point at configured providers
    let roles = [
        ("primary", &config.backends.primary),
        ("secondary", &config.backends.secondary),
        ("summarizer", &config.backends.summarizer),
    ];
    for (role, name) in roles {
        if let Some(name) = name {
            if !config.backends.providers.contains_key(name) {
                anyhow::bail!(
                    "backends.{} refers to '{}', which is not defined under [backends.providers]",
                    role,
                    name
                );
            }
        }
    }

    for (name, provider) in &config.backends.providers {
        if provider.model.trim().is_empty() {
            anyhow::bail!("backends.providers.{}.model must not be empty", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse("[db]\npath = \"./data/lens.sqlite\"\n").unwrap();
        assert_eq!(config.budget.monthly_usd, 20.0);
        assert_eq!(config.backends.max_retries, 2);
        assert_eq!(config.cache.max_age_days, 7);
        assert_eq!(config.extraction.filing_form, "10-K");
        assert!(config.backends.primary.is_none());
    }

    #[test]
    fn role_must_reference_provider() {
        let err = parse(
            r#"
[db]
path = "x.sqlite"

[backends]
primary = "openai"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }

    #[test]
    fn provider_timeout_is_clamped() {
        let config = parse(
            r#"
[db]
path = "x.sqlite"

[backends]
primary = "fast"

[backends.providers.fast]
kind = "ollama"
model = "llama3"
timeout_secs = 2
"#,
        )
        .unwrap();
        let provider = &config.backends.providers["fast"];
        assert_eq!(provider.timeout(), MIN_BACKEND_TIMEOUT);
    }
}
