use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Crate-wide error type for request handling.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// HTTP status returned to the Ollama client.
    ///
    /// Upstream 4xx answers are passed through so clients see the real cause
    /// (bad model, bad key); upstream 5xx and transport failures become 502.
    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        match self {
            RelayError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            RelayError::Upstream { status, .. } => match http::StatusCode::from_u16(*status) {
                Ok(code) if code.is_client_error() => code,
                _ => http::StatusCode::BAD_GATEWAY,
            },
            RelayError::Transport(_) => http::StatusCode::BAD_GATEWAY,
            RelayError::Config(_) | RelayError::Internal(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    #[must_use]
    fn summary(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest(_) => "Invalid request",
            RelayError::Upstream { .. } | RelayError::Transport(_) => "Failed to proxy request",
            RelayError::Config(_) | RelayError::Internal(_) => "Failed request",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    details: String,
}

/// Build the Ollama-style error body: `{"error": ..., "details": ...}`.
#[must_use]
pub fn error_payload(err: &RelayError) -> serde_json::Value {
    serde_json::to_value(ErrorBody {
        error: err.summary(),
        details: err.to_string(),
    })
    .unwrap_or_else(|_| serde_json::json!({ "error": err.summary() }))
}

/// Short error body used for plain routing failures (`{"error": ...}`).
#[must_use]
pub fn simple_error_response(status: http::StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, axum::Json(error_payload(&self))).into_response()
    }
}

/// Truncate an upstream error body for relaying to the client.
///
/// Prefers `error.message` (or a string `error`) from a JSON body and falls
/// back to the lossy text of the body.
#[must_use]
pub fn sanitize_upstream_error(body: &[u8]) -> String {
    const MAX_LEN: usize = 512;

    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            let error = json.get("error")?;
            error
                .get("message")
                .and_then(|message| message.as_str())
                .or_else(|| error.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    truncate_chars(&message, MAX_LEN)
}

fn truncate_chars(text: &str, max_len: usize) -> String {
    match text.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}
