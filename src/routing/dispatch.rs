use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{self, Body};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::embeddings::EmbeddingsRoute;
use crate::api::{chat, embeddings, generate, health, llamaedge, tags};
use crate::error::simple_error_response;
use crate::observability::log_request_complete;
use crate::state::AppState;

/// Ollama clients upload base64 images inside JSON bodies.
const DEFAULT_BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteMatch {
    Root,
    Version,
    Tags,
    Chat,
    Generate,
    Embeddings(EmbeddingsRoute),
    NodeConfig,
    NodeInfo,
    Preflight,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching Ollama handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let started_at = Instant::now();
    let request_seq = state.next_request_seq();
    let (parts, body) = request.into_parts();
    let route = match_route(
        &parts.method,
        parts.uri.path(),
        base_path.as_ref(),
        state.config.features.llamaedge.enabled,
    );
    tracing::debug!(request_seq, method = %parts.method, path = parts.uri.path(), ?route, "request");

    let mut response = match route {
        RouteMatch::Root => health::root_handler(),
        RouteMatch::Version => health::version_handler(),
        RouteMatch::Tags => tags::handler(&state),
        RouteMatch::Chat => match read_request_body(body).await {
            Ok(bytes) => chat::handler(Arc::clone(&state), bytes).await,
            Err(response) => response,
        },
        RouteMatch::Generate => match read_request_body(body).await {
            Ok(bytes) => generate::handler(Arc::clone(&state), bytes).await,
            Err(response) => response,
        },
        RouteMatch::Embeddings(kind) => match read_request_body(body).await {
            Ok(bytes) => embeddings::handler(Arc::clone(&state), bytes, kind).await,
            Err(response) => response,
        },
        RouteMatch::NodeConfig => llamaedge::config_pub_handler(&state, &parts.headers).await,
        RouteMatch::NodeInfo => llamaedge::info_handler(&state).await,
        RouteMatch::Preflight => preflight_response(&parts.headers),
        RouteMatch::MethodNotAllowed => {
            simple_error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        }
        RouteMatch::NotFound => {
            simple_error_response(StatusCode::NOT_FOUND, "Endpoint not supported")
        }
    };

    response.headers_mut().insert(
        http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    log_request_complete(
        request_seq,
        &parts.method,
        parts.uri.path(),
        response.status(),
        started_at,
    );
    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, DEFAULT_BODY_LIMIT_BYTES)
        .await
        .map_err(|_| {
            simple_error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large (max 50MiB)",
            )
        })
}

fn preflight_response(headers: &HeaderMap) -> Response {
    let allow_headers = headers
        .get(http::header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("Content-Type, Authorization"));
    (
        StatusCode::NO_CONTENT,
        [
            (
                http::header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, HEAD, POST, OPTIONS"),
            ),
            (http::header::ACCESS_CONTROL_ALLOW_HEADERS, allow_headers),
        ],
    )
        .into_response()
}

#[inline]
fn only(method: &Method, allowed: &Method, route: RouteMatch) -> RouteMatch {
    if method == allowed {
        route
    } else {
        RouteMatch::MethodNotAllowed
    }
}

fn match_route(method: &Method, path: &str, base_path: &str, llamaedge: bool) -> RouteMatch {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };
    if method == Method::OPTIONS {
        return RouteMatch::Preflight;
    }

    match path {
        "/" => {
            if method == Method::GET || method == Method::HEAD {
                RouteMatch::Root
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/api/version" => only(method, &Method::GET, RouteMatch::Version),
        "/api/tags" => only(method, &Method::GET, RouteMatch::Tags),
        "/api/chat" => only(method, &Method::POST, RouteMatch::Chat),
        "/api/generate" => only(method, &Method::POST, RouteMatch::Generate),
        "/api/embed" => only(
            method,
            &Method::POST,
            RouteMatch::Embeddings(EmbeddingsRoute::Embed),
        ),
        "/api/embeddings" => only(
            method,
            &Method::POST,
            RouteMatch::Embeddings(EmbeddingsRoute::Legacy),
        ),
        "/config_pub.json" if llamaedge => only(method, &Method::GET, RouteMatch::NodeConfig),
        "/v1/info" if llamaedge => only(method, &Method::GET, RouteMatch::NodeInfo),
        _ => RouteMatch::NotFound,
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_method_and_path() {
        assert_eq!(match_route(&Method::GET, "/", "", false), RouteMatch::Root);
        assert_eq!(match_route(&Method::HEAD, "/", "", false), RouteMatch::Root);
        assert_eq!(
            match_route(&Method::POST, "/api/chat", "", false),
            RouteMatch::Chat
        );
        assert_eq!(
            match_route(&Method::GET, "/api/chat", "", false),
            RouteMatch::MethodNotAllowed
        );
        assert_eq!(
            match_route(&Method::POST, "/api/embeddings", "", false),
            RouteMatch::Embeddings(EmbeddingsRoute::Legacy)
        );
        assert_eq!(
            match_route(&Method::POST, "/v1/chat/completions", "", false),
            RouteMatch::NotFound
        );
        assert_eq!(
            match_route(&Method::OPTIONS, "/api/chat", "", false),
            RouteMatch::Preflight
        );
    }

    #[test]
    fn node_files_need_llamaedge() {
        assert_eq!(
            match_route(&Method::GET, "/v1/info", "", false),
            RouteMatch::NotFound
        );
        assert_eq!(
            match_route(&Method::GET, "/v1/info", "", true),
            RouteMatch::NodeInfo
        );
        assert_eq!(
            match_route(&Method::GET, "/config_pub.json", "", true),
            RouteMatch::NodeConfig
        );
    }

    #[test]
    fn base_path_is_stripped() {
        let base = normalize_base_path("ollama/");
        assert_eq!(base, "/ollama");
        assert_eq!(
            match_route(&Method::GET, "/ollama/api/tags", &base, false),
            RouteMatch::Tags
        );
        assert_eq!(
            match_route(&Method::GET, "/ollama", &base, false),
            RouteMatch::Root
        );
        assert_eq!(
            match_route(&Method::GET, "/ollamax/api/tags", &base, false),
            RouteMatch::NotFound
        );
        assert_eq!(
            match_route(&Method::GET, "/api/tags", &base, false),
            RouteMatch::NotFound
        );
    }
}
