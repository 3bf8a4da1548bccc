//! TOML configuration parsing and validation.
//!
//! ```toml
//! [generation]
//! default = "claude"
//! stable = "gemini"
//!
//! [weekly]
//! source_database = "..."
//! target_database = "..."
//! date_property = "Date"
//! ```
//!
//! Everything except the `[weekly]`/`[monthly]` database ids has a default.
//! See [`load_config`] for validation rules.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::chunk::{MAX_BATCH_SIZE, MAX_FRAGMENT_LEN};
use crate::generation::Backend;
use crate::period::PeriodKind;

/// Hard field limit of the document store, in characters.
pub const STORE_TEXT_LIMIT: usize = 2000;

/// Hard block limit of one append request.
pub const STORE_APPEND_LIMIT: usize = 100;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    pub weekly: Option<ReportConfig>,
    pub monthly: Option<ReportConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            api_version: default_api_version(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_store_url() -> String {
    "https://api.notion.com/v1".to_string()
}
fn default_api_version() -> String {
    "2022-06-28".to_string()
}
fn default_token_env() -> String {
    "NOTION_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Backend requested when the caller does not name one.
    #[serde(default = "default_backend")]
    pub default: Backend,
    /// Backend used as the single fallback.
    #[serde(default = "default_stable")]
    pub stable: Backend,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default: default_backend(),
            stable: default_stable(),
            gemini: GeminiConfig::default(),
            claude: ClaudeConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

fn default_backend() -> Backend {
    Backend::Claude
}
fn default_stable() -> Backend {
    Backend::Gemini
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_url(),
            model: default_gemini_model(),
            api_key_env: default_gemini_key_env(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_gemini_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_generation_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClaudeConfig {
    #[serde(default = "default_claude_command")]
    pub command: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            command: default_claude_command(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_claude_command() -> String {
    "claude".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_ollama_model(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_fragment_len")]
    pub max_fragment_len: usize,
    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,
    /// Heading block placed after a divider above the content. Empty disables both.
    #[serde(default = "default_heading")]
    pub heading: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_fragment_len: default_fragment_len(),
            max_batch_size: default_batch_size(),
            heading: default_heading(),
        }
    }
}

fn default_fragment_len() -> usize {
    MAX_FRAGMENT_LEN
}
fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}
fn default_heading() -> String {
    "AI Summary".to_string()
}

/// Databases and field names for one period kind.
#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    pub source_database: String,
    pub target_database: String,
    /// Date field on source entries.
    #[serde(default = "default_date_property")]
    pub date_property: String,
    /// Title field name used when the target schema reports none.
    #[serde(default = "default_title_property")]
    pub title_property: String,
    #[serde(default = "default_start_property")]
    pub start_property: String,
    #[serde(default = "default_end_property")]
    pub end_property: String,
    #[serde(default = "default_relation_property")]
    pub relation_property: String,
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Source fields added to each entry's prompt section.
    #[serde(default)]
    pub prompt_properties: Vec<String>,
}

fn default_date_property() -> String {
    "Date".to_string()
}
fn default_title_property() -> String {
    "Name".to_string()
}
fn default_start_property() -> String {
    "Start".to_string()
}
fn default_end_property() -> String {
    "End".to_string()
}
fn default_relation_property() -> String {
    "Entries".to_string()
}

impl Config {
    /// The `[weekly]` or `[monthly]` section, required for runs of that kind.
    pub fn report(&self, kind: PeriodKind) -> Result<&ReportConfig> {
        let section = match kind {
            PeriodKind::Week => self.weekly.as_ref(),
            PeriodKind::Month => self.monthly.as_ref(),
        };
        section.with_context(|| format!("no [{}] section in config", kind.section()))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate publish limits
    if !(1..=STORE_TEXT_LIMIT).contains(&config.publish.max_fragment_len) {
        bail!(
            "publish.max_fragment_len must be in 1..={}",
            STORE_TEXT_LIMIT
        );
    }
    if !(1..=STORE_APPEND_LIMIT).contains(&config.publish.max_batch_size) {
        bail!(
            "publish.max_batch_size must be in 1..={}",
            STORE_APPEND_LIMIT
        );
    }

    // Validate report sections
    for kind in PeriodKind::ALL {
        let Ok(report) = config.report(kind) else {
            continue;
        };
        let section = kind.section();
        if report.source_database.trim().is_empty() {
            bail!("{}.source_database must not be empty", section);
        }
        if report.target_database.trim().is_empty() {
            bail!("{}.target_database must not be empty", section);
        }
        if report.date_property.trim().is_empty() {
            bail!("{}.date_property must not be empty", section);
        }
        if report.concurrency == Some(0) {
            bail!("{}.concurrency must be >= 1", section);
        }
    }

    if config.store.base_url.trim().is_empty() {
        bail!("store.base_url must not be empty");
    }

    Ok(())
}
