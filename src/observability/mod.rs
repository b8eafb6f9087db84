use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(filter) = tracing_filter(log_level) else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_level(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

fn tracing_filter(log_level: &str) -> Option<EnvFilter> {
    let level = tracing_level(log_level)?;
    Some(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("INFO")))
}

/// Log one finished request. Streaming responses log when the headers go out;
/// the stream itself logs its own completion.
pub fn log_request_complete(
    request_id: u64,
    method: &http::Method,
    path: &str,
    status: http::StatusCode,
    started_at: Instant,
) {
    let elapsed_ms = started_at.elapsed().as_millis();
    if status.is_server_error() {
        tracing::warn!(request_id, %method, path, status = status.as_u16(), elapsed_ms, "request finished");
    } else {
        tracing::info!(request_id, %method, path, status = status.as_u16(), elapsed_ms, "request finished");
    }
}
