pub mod validation;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::stream::StreamSettings;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    11434
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            runtime_worker_threads: None,
            base_path: String::new(),
        }
    }
}

/// Chat-completion upstream the relay forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    /// When set, every chat/generate call goes upstream with this model.
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub use_env_proxy: bool,
}

fn default_request_timeout_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_pool_max_idle_per_host() -> usize {
    16
}

/// Embeddings upstream. Falls back to the chat upstream's URL and key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model_map")]
    pub model_map: BTreeMap<String, String>,
    #[serde(default = "default_embedding_model")]
    pub default_model: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_model_map() -> BTreeMap<String, String> {
    [
        ("hellord/mxbai-embed-large-v1:f16", "mixedbread-ai/mxbai-embed-large-v1"),
        ("all-minilm", "nomic-embed"),
        ("all-mini", "nomic-embed"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model_map: default_embedding_model_map(),
            default_model: default_embedding_model(),
        }
    }
}

/// Stream transcoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_done_reason")]
    pub default_done_reason: String,
}

fn default_max_line_bytes() -> usize {
    crate::stream::lines::DEFAULT_MAX_LINE_BYTES
}
fn default_done_reason() -> String {
    "stop".to_string()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            default_done_reason: default_done_reason(),
        }
    }
}

impl StreamingConfig {
    #[must_use]
    pub fn settings(&self) -> StreamSettings {
        StreamSettings {
            max_line_bytes: self.max_line_bytes,
            default_done_reason: Arc::from(self.default_done_reason.as_str()),
        }
    }
}

/// Model catalog additions served from `/api/tags`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub names: Vec<String>,
    /// JSON file holding an array of extra model names.
    #[serde(default)]
    pub file: Option<String>,
}

/// LlamaEdge node info files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlamaEdgeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_llamaedge_config_dir")]
    pub config_dir: String,
}

fn default_llamaedge_config_dir() -> String {
    "./config".to_string()
}

impl Default for LlamaEdgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            config_dir: default_llamaedge_config_dir(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub llamaedge: LlamaEdgeConfig,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            llamaedge: LlamaEdgeConfig::default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Minimal config for one upstream; every other section at its default.
    #[must_use]
    pub fn with_upstream(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                base_url: base_url.into(),
                api_key: api_key.into(),
                model_override: None,
                request_timeout_secs: default_request_timeout_secs(),
                connect_timeout_secs: default_connect_timeout_secs(),
                pool_max_idle_per_host: default_pool_max_idle_per_host(),
                proxy: None,
                use_env_proxy: false,
            },
            embedding: EmbeddingConfig::default(),
            streaming: StreamingConfig::default(),
            models: ModelsConfig::default(),
            features: FeaturesConfig::default(),
        }
    }

    /// Embeddings base URL, falling back to the chat upstream.
    #[must_use]
    pub fn embedding_base_url(&self) -> &str {
        self.embedding
            .base_url
            .as_deref()
            .unwrap_or(&self.upstream.base_url)
    }

    /// Embeddings bearer credential, falling back to the chat upstream.
    #[must_use]
    pub fn embedding_api_key(&self) -> &str {
        self.embedding
            .api_key
            .as_deref()
            .unwrap_or(&self.upstream.api_key)
    }
}

/// Environment variables that override file settings when set and non-empty.
pub const ENV_UPSTREAM_API_URL: &str = "UPSTREAM_API_URL";
pub const ENV_UPSTREAM_API_KEY: &str = "UPSTREAM_API_KEY";
pub const ENV_EMBEDDING_API_URL: &str = "EMBEDDING_API_URL";
pub const ENV_EMBEDDING_API_KEY: &str = "EMBEDDING_API_KEY";
pub const ENV_RELAY_PORT: &str = "RELAY_PORT";
pub const ENV_DEFAULT_MODEL: &str = "DEFAULT_MODEL";

/// Apply environment overrides through `lookup`.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when `RELAY_PORT` is not a valid port.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(url) = get(ENV_UPSTREAM_API_URL) {
        config.upstream.base_url = url;
    }
    if let Some(key) = get(ENV_UPSTREAM_API_KEY) {
        config.upstream.api_key = key;
    }
    if let Some(url) = get(ENV_EMBEDDING_API_URL) {
        config.embedding.base_url = Some(url);
    }
    if let Some(key) = get(ENV_EMBEDDING_API_KEY) {
        config.embedding.api_key = Some(key);
    }
    if let Some(model) = get(ENV_DEFAULT_MODEL) {
        config.upstream.model_override = Some(model);
    }
    if let Some(port) = get(ENV_RELAY_PORT) {
        config.server.port = port.trim().parse().map_err(|_| {
            ConfigError::Validation(format!("{ENV_RELAY_PORT} must be a port number, got '{port}'"))
        })?;
    }
    Ok(())
}

/// Parse YAML text, apply overrides and validate.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when an override or semantic check fails.
pub fn parse_config<F>(contents: &str, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: AppConfig = serde_yaml::from_str(contents)?;
    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file, apply process environment overrides
/// and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, |key| std::env::var(key).ok())
}
