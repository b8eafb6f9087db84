use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::catalog::ModelCatalog;
use crate::config::AppConfig;
use crate::error::RelayError;
use crate::stream::StreamSettings;
use crate::transport::{endpoint_url, UpstreamClient};

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
    pub catalog: ModelCatalog,
    stream_settings: StreamSettings,
    chat_url: String,
    embeddings_url: String,
    request_seq: AtomicU64,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: UpstreamClient, catalog: ModelCatalog) -> Self {
        let stream_settings = config.streaming.settings();
        let chat_url = endpoint_url(&config.upstream.base_url, "chat/completions");
        let embeddings_url = endpoint_url(config.embedding_base_url(), "embeddings");
        Self {
            config,
            upstream,
            catalog,
            stream_settings,
            chat_url,
            embeddings_url,
            request_seq: AtomicU64::new(1),
        }
    }

    /// Build the client and catalog from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the upstream client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Arc<Self>, RelayError> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        let catalog = ModelCatalog::from_config(&config.models);
        Ok(Arc::new(Self::new(config, upstream, catalog)))
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub fn stream_settings(&self) -> &StreamSettings {
        &self.stream_settings
    }

    /// `{upstream.base_url}/chat/completions`
    #[must_use]
    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    /// `{embedding.base_url}/embeddings`
    #[must_use]
    pub fn embeddings_url(&self) -> &str {
        &self.embeddings_url
    }

    /// Model sent upstream for a chat/generate call.
    #[must_use]
    pub fn upstream_model<'a>(&'a self, requested: &'a str) -> &'a str {
        self.config
            .upstream
            .model_override
            .as_deref()
            .unwrap_or(requested)
    }

    /// Upstream embeddings model for an Ollama model name.
    #[must_use]
    pub fn embedding_model<'a>(&'a self, requested: &str) -> &'a str {
        let embedding = &self.config.embedding;
        embedding
            .model_map
            .get(requested)
            .map_or(embedding.default_model.as_str(), String::as_str)
    }
}
