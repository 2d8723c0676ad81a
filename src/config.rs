//! TOML configuration parsing and validation.
//!
//! Only `[db]` and `[watch] root` are required; every other section falls
//! back to defaults. See [`load_config`] for the validation rules.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub watch: WatchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub intent: IntentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub root: PathBuf,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Seconds between reconciliation scans while the watcher is degraded.
    #[serde(default = "default_degraded_rescan_secs")]
    pub degraded_rescan_secs: u64,
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn degraded_rescan(&self) -> Duration {
        Duration::from_secs(self.degraded_rescan_secs)
    }
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_file_size() -> u64 {
    52_428_800 // 50MB
}
fn default_degraded_rescan_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_text_chars: default_max_text_chars(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_max_text_chars() -> usize {
    3000
}
fn default_min_text_chars() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_models_provider")]
    pub provider: String,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub show_download_progress: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            provider: default_models_provider(),
            cache_dir: None,
            show_download_progress: false,
        }
    }
}

fn default_models_provider() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_tesseract_command")]
    pub command: String,
    #[serde(default = "default_ocr_language")]
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            command: default_tesseract_command(),
            language: default_ocr_language(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_tesseract_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_language() -> String {
    "eng".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "crate::tagger::default_labels")]
    pub labels: Vec<String>,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: default_top_n(),
            labels: crate::tagger::default_labels(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_top_n() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_tag_boost")]
    pub tag_boost: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            candidate_k: default_candidate_k(),
            tag_boost: default_tag_boost(),
        }
    }
}

fn default_k() -> usize {
    10
}
fn default_candidate_k() -> usize {
    50
}
fn default_tag_boost() -> f32 {
    0.15
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_intent_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_intent_timeout")]
    pub timeout_secs: u64,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_intent_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_intent_timeout(),
        }
    }
}

impl IntentConfig {
    /// The credential, if one is configured. Placeholder values count as absent.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && k != "your_gemini_api_key_here")
    }
}

fn default_intent_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_intent_timeout() -> u64 {
    10
}

/// Exclusions applied on top of the configured ones.
pub fn default_excludes() -> Vec<String> {
    vec![
        "**/.*".to_string(),
        "**/.*/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/__pycache__/**".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }

    if config.watch.queue_capacity == 0 {
        anyhow::bail!("watch.queue_capacity must be >= 1");
    }

    if config.watch.degraded_rescan_secs == 0 {
        anyhow::bail!("watch.degraded_rescan_secs must be >= 1");
    }

    if config.search.default_k == 0 {
        anyhow::bail!("search.default_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.search.tag_boost) {
        anyhow::bail!("search.tag_boost must be in [0.0, 1.0]");
    }

    if config.tagging.enabled && config.tagging.labels.is_empty() {
        anyhow::bail!("tagging.labels must not be empty when tagging is enabled");
    }

    match config.models.provider.as_str() {
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown models provider: '{}'. Must be disabled or local.",
            other
        ),
    }

    match config.ocr.provider.as_str() {
        "disabled" | "tesseract" => {}
        other => anyhow::bail!(
            "Unknown OCR provider: '{}'. Must be disabled or tesseract.",
            other
        ),
    }

    match config.intent.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown intent provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    Ok(())
}
