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
struct GenerateRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    format: Option<Value>,
    #[serde(default)]
    options: Option<OllamaOptions>,
}

impl GenerateRequest {
    /// The prompt (and optional system text) as chat messages.
    fn messages(&self) -> Vec<UpstreamMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(UpstreamMessage::new("system", system));
        }
        messages.push(UpstreamMessage::new("user", self.prompt.as_str()));
        messages
    }
}

/// `POST /api/generate`
pub async fn handler(state: Arc<AppState>, body: Bytes) -> Response {
    handle(&state, &body)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn handle(state: &AppState, body: &[u8]) -> Result<Response, RelayError> {
    let request: GenerateRequest = parse_json_body(body)?;
    let messages = request.messages();
    let upstream_request = UpstreamChatRequest {
        model: state.upstream_model(&request.model),
        messages,
        stream: request.stream.unwrap_or(true),
        params: request.options.clone().unwrap_or_default().into(),
        response_format: response_format(request.format.as_ref()),
    };
    tracing::debug!(
        model = %request.model,
        upstream_model = upstream_request.model,
        stream = upstream_request.stream,
        prompt_bytes = request.prompt.len(),
        "generate request"
    );
    if !state.catalog.contains(&request.model) {
        tracing::debug!(model = %request.model, "model not in catalog, forwarding anyway");
    }

    relay_completion(
        state,
        OutputProfile::Completion,
        &request.model,
        &upstream_request,
    )
    .await
}
