use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Version reported on `/api/version`.
pub const OLLAMA_API_VERSION: &str = "0.1.0";

/// `GET /`, the liveness probe Ollama clients poll.
#[must_use]
pub fn root_handler() -> Response {
    (
        http::StatusCode::OK,
        [(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        )],
        "Ollama is running",
    )
        .into_response()
}

/// `GET /api/version`
#[must_use]
pub fn version_handler() -> Response {
    axum::Json(json!({ "version": OLLAMA_API_VERSION })).into_response()
}
