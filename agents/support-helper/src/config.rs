//! Runtime configuration for the Support Helper Agent
//!
//! Values are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. Optional TOML file (`--config support-helper.toml`)
//! 3. `.env` file in the working directory
//! 4. Process environment
//! 5. CLI flags (applied by the caller)
//!
//! Model name and token pricing are not configurable; see the constants in
//! [`crate::telemetry`].
//!
//! # Example file
//!
//! ```toml
//! metrics_file = "metrics/metrics.csv"
//!
//! [api]
//! base_url = "https://openrouter.ai/api/v1"
//! timeout_ms = 30000
//! max_retries = 2
//!
//! [safety]
//! max_query_chars = 5000
//! extra_injection_patterns = ["developer\\s+mode"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SupportError};

pub const ENV_API_KEY: &str = "OPENROUTER_API_KEY";
pub const ENV_BASE_URL: &str = "OPENROUTER_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "SUPPORT_HELPER_TIMEOUT_MS";
pub const ENV_MAX_RETRIES: &str = "SUPPORT_HELPER_MAX_RETRIES";
pub const ENV_METRICS_FILE: &str = "SUPPORT_HELPER_METRICS_FILE";
pub const ENV_MAX_QUERY_CHARS: &str = "SUPPORT_HELPER_MAX_QUERY_CHARS";

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_METRICS_FILE: &str = "metrics/metrics.csv";

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Model API connection settings
    pub api: ApiConfig,

    /// Safety screen thresholds and extra patterns
    pub safety: SafetyConfig,

    /// CSV file receiving one metrics row per query
    pub metrics_file: PathBuf,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            safety: SafetyConfig::default(),
            metrics_file: PathBuf::from(DEFAULT_METRICS_FILE),
        }
    }
}

/// Model API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,

    /// Bearer credential; normally supplied through the environment
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,

    /// Retries for timeouts, 429 and 5xx responses (0 disables retrying)
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_ms: 30_000,
            max_retries: 0,
            initial_backoff_ms: 250,
        }
    }
}

/// Safety screen thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Maximum query length in characters (inclusive)
    pub max_query_chars: usize,

    /// Longest allowed run of one repeated character
    pub max_repeated_chars: usize,

    /// Maximum share of characters that are neither alphanumeric nor whitespace
    pub max_special_char_ratio: f64,

    /// Maximum share of tokens taken by the single most frequent token
    pub dominant_token_ratio: f64,

    /// Token count below which the dominant-token check is skipped
    pub min_tokens_for_ratio: usize,

    /// Additional case-insensitive prompt-injection regexes
    pub extra_injection_patterns: Vec<String>,

    /// Additional case-insensitive exfiltration regexes
    pub extra_exfiltration_patterns: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_query_chars: 5000,
            max_repeated_chars: 20,
            max_special_char_ratio: 0.5,
            dominant_token_ratio: 0.6,
            min_tokens_for_ratio: 10,
            extra_injection_patterns: Vec::new(),
            extra_exfiltration_patterns: Vec::new(),
        }
    }
}

impl HelperConfig {
    /// Load configuration from an optional TOML file, `.env` and the process
    /// environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        // A missing .env file is normal outside development
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }

        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SupportError::FileError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override values from an environment lookup function
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.api.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.api.base_url = url;
        }
        if let Some(path) = lookup(ENV_METRICS_FILE).filter(|p| !p.trim().is_empty()) {
            self.metrics_file = PathBuf::from(path);
        }

        override_parsed(&lookup, ENV_TIMEOUT_MS, &mut self.api.timeout_ms);
        override_parsed(&lookup, ENV_MAX_RETRIES, &mut self.api.max_retries);
        override_parsed(&lookup, ENV_MAX_QUERY_CHARS, &mut self.safety.max_query_chars);
    }

    /// The API credential, or a configuration error naming the variable to set
    pub fn require_api_key(&self) -> Result<&str> {
        self.api.api_key.as_deref().ok_or_else(|| {
            SupportError::config_error(format!(
                "{} is missing. Add it to the environment or a .env file",
                ENV_API_KEY
            ))
        })
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(
                variable = key,
                value = %raw,
                "Ignoring unparseable environment override"
            ),
        }
    }
}
