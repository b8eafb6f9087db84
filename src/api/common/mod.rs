mod completion;
mod options;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::RelayError;

pub(crate) use completion::{relay_completion, UpstreamChatRequest, UpstreamMessage};
pub(crate) use options::{response_format, OllamaOptions, SamplingParams};

/// Parse a request body as JSON whatever its `Content-Type`. An empty body
/// reads as `{}`.
pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, RelayError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body)
        .map_err(|err| RelayError::InvalidRequest(format!("Invalid JSON body: {err}")))
}

#[inline]
pub(crate) fn ok_json_response(body_bytes: Bytes) -> Response {
    let mut response = Response::new(Body::from(body_bytes));
    *response.status_mut() = http::StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

#[inline]
pub(crate) fn ndjson_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/x-ndjson"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    response
}
