//! LlamaEdge node metadata files, served only when the feature is enabled.

use std::path::{Path, PathBuf};

use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::error::simple_error_response;
use crate::state::AppState;

const CONFIG_FILE: &str = "config.json";
const INFO_FILE: &str = "info.json";

fn config_dir(state: &AppState) -> PathBuf {
    PathBuf::from(&state.config.features.llamaedge.config_dir)
}

async fn read_json_file(path: &Path) -> Option<Value> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "node file unavailable");
            return None;
        }
    };
    match serde_json::from_slice(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "node file is not valid JSON");
            None
        }
    }
}

/// First DNS label of a `Host` header value, without any port.
fn node_address(host: &str) -> &str {
    let host = host.split(':').next().unwrap_or(host);
    host.split('.').next().unwrap_or(host)
}

/// `GET /config_pub.json`: `config.json` with `address` set from the
/// request's `Host`.
pub async fn config_pub_handler(state: &AppState, headers: &http::HeaderMap) -> Response {
    let path = config_dir(state).join(CONFIG_FILE);
    let Some(mut config) = read_json_file(&path).await else {
        return simple_error_response(http::StatusCode::NOT_FOUND, "Config not found");
    };
    let host = headers
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if let Value::Object(map) = &mut config {
        map.insert(
            "address".to_string(),
            Value::String(node_address(host).to_string()),
        );
    }
    axum::Json(config).into_response()
}

/// `GET /v1/info`: `info.json` verbatim.
pub async fn info_handler(state: &AppState) -> Response {
    let path = config_dir(state).join(INFO_FILE);
    match read_json_file(&path).await {
        Some(info) => axum::Json(info).into_response(),
        None => simple_error_response(http::StatusCode::NOT_FOUND, "Info not found"),
    }
}
