use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use super::common::{
    parse_json_body, relay_completion, response_format, OllamaOptions, UpstreamChatRequest,
    UpstreamMessage,
};
use crate::error::RelayError;
use crate::state::AppState;
use crate::stream::OutputProfile;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    messages: Vec<UpstreamMessage>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    format: Option<Value>,
    #[serde(default)]
    options: Option<OllamaOptions>,
}

/// `POST /api/chat`
pub async fn handler(state: Arc<AppState>, body: Bytes) -> Response {
    handle(&state, &body)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn handle(state: &AppState, body: &[u8]) -> Result<Response, RelayError> {
    let request: ChatRequest = parse_json_body(body)?;
    let upstream_request = UpstreamChatRequest {
        model: state.upstream_model(&request.model),
        messages: request.messages,
        stream: request.stream.unwrap_or(true),
        params: request.options.unwrap_or_default().into(),
        response_format: response_format(request.format.as_ref()),
    };
    tracing::debug!(
        model = %request.model,
        upstream_model = upstream_request.model,
        stream = upstream_request.stream,
        messages = upstream_request.messages.len(),
        "chat request"
    );
    if !state.catalog.contains(&request.model) {
        tracing::debug!(model = %request.model, "model not in catalog, forwarding anyway");
    }

    relay_completion(state, OutputProfile::Chat, &request.model, &upstream_request).await
}
