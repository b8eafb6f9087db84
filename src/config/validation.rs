use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_embedding(config)?;
    validate_streaming(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.port == 0 {
        return Err(validation_err("server.port must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    let base_path = server.base_path.trim();
    if !base_path.is_empty() && !base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/' when set"));
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value.trim()).map_err(|err| {
        validation_err(format!("{field_name} is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    validate_http_url("upstream.base_url", &upstream.base_url)?;
    if upstream.api_key.trim().is_empty() {
        return Err(validation_err("upstream.api_key cannot be empty"));
    }
    if upstream.pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "upstream.pool_max_idle_per_host must be greater than 0",
        ));
    }
    if upstream.request_timeout_secs == 0 || upstream.connect_timeout_secs == 0 {
        return Err(validation_err("upstream timeouts must be greater than 0"));
    }
    if let Some(model) = upstream.model_override.as_deref() {
        if model.trim().is_empty() {
            return Err(validation_err(
                "upstream.model_override cannot be empty when set",
            ));
        }
    }
    validate_proxy_url(upstream.proxy.as_deref())?;
    Ok(())
}

fn validate_proxy_url(proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err("upstream.proxy cannot be empty when set"));
    }
    validate_http_url("upstream.proxy", proxy)
}

fn validate_embedding(config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(url) = config.embedding.base_url.as_deref() {
        validate_http_url("embedding.base_url", url)?;
    }
    if config.embedding.default_model.trim().is_empty() {
        return Err(validation_err("embedding.default_model cannot be empty"));
    }
    for (from, to) in &config.embedding.model_map {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(validation_err(
                "embedding.model_map cannot contain empty model names",
            ));
        }
    }
    Ok(())
}

fn validate_streaming(config: &AppConfig) -> Result<(), ConfigError> {
    let streaming = &config.streaming;
    if streaming.max_line_bytes < 1024 {
        return Err(validation_err(
            "streaming.max_line_bytes must be at least 1024",
        ));
    }
    if streaming.default_done_reason.trim().is_empty() {
        return Err(validation_err(
            "streaming.default_done_reason cannot be empty",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
