use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{LinguaError, Result};

pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TranslatorConfig {
    /// Name of the active provider; must match a key in `providers`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub key_pool: KeyPoolConfig,
    #[serde(default)]
    pub caches: CachesConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_provider() -> String {
    "gemini".to_string()
}

impl TranslatorConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| LinguaError::Config(err.to_string()))
    }

    pub fn provider_settings(&self) -> Result<&ProviderSettings> {
        self.providers.get(&self.provider).ok_or_else(|| {
            LinguaError::Config(format!(
                "no settings configured for provider {}",
                self.provider
            ))
        })
    }
}

#[derive(Clone, Deserialize)]
pub struct ProviderSettings {
    /// Keys used verbatim and in order; duplicates are kept so a key listed
    /// twice gets twice the pick weight.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Environment variable names consulted after `api_keys`.
    #[serde(default)]
    pub api_key_env: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            api_key_env: Vec::new(),
            base_url: None,
            model: default_model(),
        }
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_keys", &format!("<{} redacted>", self.api_keys.len()))
            .field("api_key_env", &self.api_key_env)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderSettings {
    /// Explicit keys first, then values pulled from the named env variables.
    /// Unset variables are skipped, not an error.
    pub fn resolve_keys(&self, env: &Env) -> Vec<String> {
        let mut keys = Vec::new();
        for key in &self.api_keys {
            let key = key.trim();
            if !key.is_empty() {
                keys.push(key.to_string());
            }
        }
        for name in &self.api_key_env {
            match env.get(name) {
                Some(value) => keys.push(value),
                None => tracing::debug!(variable = %name, "api key env variable unset or empty"),
            }
        }
        keys
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitConfig {
    /// Admissions allowed inside one window. Zero disables the gate.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_per_milliseconds")]
    pub per_milliseconds: u64,
}

fn default_max_requests() -> u32 {
    10
}

fn default_per_milliseconds() -> u64 {
    1000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            per_milliseconds: default_per_milliseconds(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct KeyPoolConfig {
    #[serde(default = "default_max_active_per_key")]
    pub max_active_per_key: u32,
    #[serde(default = "default_blacklist_ms")]
    pub blacklist_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_max_active_per_key() -> u32 {
    3
}

fn default_blacklist_ms() -> u64 {
    60_000
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

impl Default for KeyPoolConfig {
    fn default() -> Self {
        Self {
            max_active_per_key: default_max_active_per_key(),
            blacklist_ms: default_blacklist_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CachesConfig {
    #[serde(default = "default_text_cache")]
    pub text: CacheSettings,
    #[serde(default = "default_image_cache")]
    pub image: CacheSettings,
    #[serde(default = "default_media_cache")]
    pub media: CacheSettings,
}

fn default_text_cache() -> CacheSettings {
    CacheSettings {
        enabled: true,
        max_entries: 1000,
        expiration_ms: DAY_MS,
    }
}

fn default_image_cache() -> CacheSettings {
    CacheSettings {
        enabled: true,
        max_entries: 100,
        expiration_ms: DAY_MS,
    }
}

fn default_media_cache() -> CacheSettings {
    CacheSettings {
        enabled: true,
        max_entries: 50,
        expiration_ms: DAY_MS,
    }
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            text: default_text_cache(),
            image: default_image_cache(),
            media: default_media_cache(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_expiration_ms")]
    pub expiration_ms: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_cache_expiration_ms() -> u64 {
    DAY_MS
}

impl Default for CacheSettings {
    fn default() -> Self {
        default_text_cache()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_batch_size() -> usize {
    6
}

fn default_batch_delay_ms() -> u64 {
    100
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

/// Dotenv-backed environment lookup. Values from parsed dotenv content win
/// over process env; blank values are treated as unset.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.dotenv.get(key) {
            return Some(value.clone());
        }
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::<String, String>::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        if key.is_empty() {
            continue;
        }

        let mut value = raw_value.trim().to_string();
        if let Some(stripped) = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        {
            value = stripped.to_string();
        }

        if value.trim().is_empty() {
            continue;
        }

        out.insert(key.to_string(), value);
    }

    out
}
