//! Application configuration for OrgBrief.
//!
//! User config lives at `~/.orgbrief/orgbrief.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrgBriefError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "orgbrief.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".orgbrief";

// ---------------------------------------------------------------------------
// Config structs (matching orgbrief.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion service settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Job queue and invocation limits.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Document store location and selection window.
    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Report templates and output.
    #[serde(default)]
    pub report: ReportConfig,

    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[completion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Service base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model for grounded, high-quality calls.
    #[serde(default = "default_primary_model")]
    pub primary_model: String,

    /// Model substituted for late retries of the grounded tier.
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Model for cheap formatting calls.
    #[serde(default = "default_fast_model")]
    pub fast_model: String,

    /// Attempts per completion call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Zero-based attempt index from which the fallback model is used.
    #[serde(default = "default_fallback_from_attempt")]
    pub fallback_from_attempt: u32,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            fast_model: default_fast_model(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            fallback_from_attempt: default_fallback_from_attempt(),
            request_timeout_secs: default_request_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_primary_model() -> String {
    "gemini-2.5-pro".into()
}
fn default_fallback_model() -> String {
    "gemini-2.5-pro-preview-03-25".into()
}
fn default_fast_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_fallback_from_attempt() -> u32 {
    2
}
fn default_request_timeout_secs() -> u64 {
    300
}
fn default_max_output_tokens() -> u32 {
    65_536
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wall-clock budget for one invocation.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,

    /// Maximum entities processed per invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Period of the recurring resume trigger.
    #[serde(default = "default_trigger_period_secs")]
    pub trigger_period_secs: u64,

    /// Pause after each processed entity.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Invocations allowed to start the same entity before it is retired.
    #[serde(default = "default_max_entity_attempts")]
    pub max_entity_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: default_time_budget_secs(),
            batch_size: default_batch_size(),
            trigger_period_secs: default_trigger_period_secs(),
            rate_limit_ms: default_rate_limit_ms(),
            max_entity_attempts: default_max_entity_attempts(),
        }
    }
}

fn default_time_budget_secs() -> u64 {
    300
}
fn default_batch_size() -> u32 {
    1
}
fn default_trigger_period_secs() -> u64 {
    60
}
fn default_rate_limit_ms() -> u64 {
    1_000
}
fn default_max_entity_attempts() -> u32 {
    3
}

/// `[documents]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Root directory holding one sub-directory per entity.
    #[serde(default = "default_documents_root")]
    pub root: String,

    /// Documents modified within this many days count as recent.
    #[serde(default = "default_recency_days")]
    pub recency_days: u32,

    /// Cap on recent documents sent for extraction.
    #[serde(default = "default_max_recent")]
    pub max_recent: usize,

    /// Most-recent documents used when none fall inside the window.
    #[serde(default = "default_fallback_count")]
    pub fallback_count: usize,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            recency_days: default_recency_days(),
            max_recent: default_max_recent(),
            fallback_count: default_fallback_count(),
        }
    }
}

fn default_documents_root() -> String {
    "~/orgbrief-documents".into()
}
fn default_recency_days() -> u32 {
    183
}
fn default_max_recent() -> usize {
    3
}
fn default_fallback_count() -> usize {
    2
}

/// `[report]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory of `<template-id>.md` templates.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,

    /// Directory rendered reports are written to.
    #[serde(default = "default_report_output_dir")]
    pub output_dir: String,

    /// Template used when a submission names none.
    #[serde(default = "default_template")]
    pub default_template: String,

    /// Logo URL pattern; `{domain}` is replaced with the entity's domain.
    #[serde(default = "default_logo_url_template")]
    pub logo_url_template: String,

    /// Flag URL pattern; `{code}` is replaced with the ISO country code.
    #[serde(default = "default_flag_url_template")]
    pub flag_url_template: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            templates_dir: default_templates_dir(),
            output_dir: default_report_output_dir(),
            default_template: default_template(),
            logo_url_template: default_logo_url_template(),
            flag_url_template: default_flag_url_template(),
        }
    }
}

fn default_templates_dir() -> String {
    "~/.orgbrief/templates".into()
}
fn default_report_output_dir() -> String {
    "~/orgbrief-reports".into()
}
fn default_template() -> String {
    "default".into()
}
fn default_logo_url_template() -> String {
    "https://t3.gstatic.com/faviconV2?client=SOCIAL&type=FAVICON&fallback_opts=TYPE,SIZE,URL&url=http://{domain}&size=128".into()
}
fn default_flag_url_template() -> String {
    "https://flagsapi.com/{code}/flat/64.png".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.orgbrief/orgbrief.db".into()
}

// ---------------------------------------------------------------------------
// Scheduler limits (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime scheduler limits.
#[derive(Debug, Clone)]
pub struct SchedulerLimits {
    pub time_budget: Duration,
    pub batch_size: u32,
    pub trigger_period: Duration,
    pub rate_limit: Duration,
    pub max_entity_attempts: u32,
}

impl From<&AppConfig> for SchedulerLimits {
    fn from(config: &AppConfig) -> Self {
        let s = &config.scheduler;
        Self {
            time_budget: Duration::from_secs(s.time_budget_secs),
            batch_size: s.batch_size.max(1),
            trigger_period: Duration::from_secs(s.trigger_period_secs),
            rate_limit: Duration::from_millis(s.rate_limit_ms),
            max_entity_attempts: s.max_entity_attempts.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.orgbrief/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| OrgBriefError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.orgbrief/orgbrief.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| OrgBriefError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| OrgBriefError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| OrgBriefError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| OrgBriefError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| OrgBriefError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| OrgBriefError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the completion API key from the configured env var.
pub fn api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.completion.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(OrgBriefError::config(format!(
            "completion API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the completion API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    api_key(config).map(|_| ())
}
