use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::common::{ok_json_response, parse_json_body};
use crate::error::RelayError;
use crate::state::AppState;

const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";

/// Which Ollama embeddings endpoint answered; the legacy one also carries a
/// flat `embedding` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingsRoute {
    /// `/api/embed`
    Embed,
    /// `/api/embeddings`
    Legacy,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    prompt: Option<Value>,
}

impl EmbeddingsRequest {
    fn model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(DEFAULT_EMBEDDING_MODEL)
    }

    /// `input` wins over `prompt`; blank strings and empty arrays count as
    /// missing.
    fn take_input(&mut self) -> Option<Value> {
        [self.input.take(), self.prompt.take()]
            .into_iter()
            .flatten()
            .find(|value| match value {
                Value::String(text) => !text.is_empty(),
                Value::Array(items) => !items.is_empty(),
                Value::Null => false,
                _ => true,
            })
    }
}

#[derive(Serialize)]
struct UpstreamEmbeddingsRequest<'a> {
    model: &'a str,
    input: Value,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct UpstreamEmbeddingsResponse {
    #[serde(default)]
    data: Vec<UpstreamEmbedding>,
}

#[derive(Deserialize)]
struct UpstreamEmbedding {
    embedding: Vec<Value>,
}

#[derive(Serialize)]
struct EmbeddingsResponse<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<&'a [Value]>,
    embeddings: &'a [Vec<Value>],
}

/// `POST /api/embed` and `POST /api/embeddings`
pub async fn handler(state: Arc<AppState>, body: Bytes, route: EmbeddingsRoute) -> Response {
    handle(&state, &body, route)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn handle(
    state: &AppState,
    body: &[u8],
    route: EmbeddingsRoute,
) -> Result<Response, RelayError> {
    let mut request: EmbeddingsRequest = parse_json_body(body)?;
    let input = request.take_input().ok_or_else(|| {
        RelayError::InvalidRequest(
            "Missing required parameter: Either \"prompt\" or \"input\" must be provided".into(),
        )
    })?;
    let upstream_model = state.embedding_model(request.model());
    tracing::debug!(model = request.model(), upstream_model, "embeddings request");

    let upstream_body = serde_json::to_vec(&UpstreamEmbeddingsRequest {
        model: upstream_model,
        input,
        encoding_format: "float",
    })
    .map_err(|err| RelayError::Internal(format!("Failed to encode upstream request: {err}")))?;

    let response = state
        .upstream
        .post_json(
            state.embeddings_url(),
            state.config.embedding_api_key(),
            Bytes::from(upstream_body),
            false,
        )
        .await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|err| RelayError::Transport(format!("Failed to read upstream body: {err}")))?;

    let parsed: UpstreamEmbeddingsResponse = serde_json::from_slice(&bytes).map_err(|err| {
        RelayError::Upstream {
            status: http::StatusCode::BAD_GATEWAY.as_u16(),
            message: format!("Invalid embeddings response: {err}"),
        }
    })?;
    let vectors: Vec<Vec<Value>> = parsed.data.into_iter().map(|item| item.embedding).collect();
    if vectors.is_empty() {
        return Err(RelayError::Upstream {
            status: http::StatusCode::BAD_GATEWAY.as_u16(),
            message: "Embeddings response contained no vectors".into(),
        });
    }

    let body = EmbeddingsResponse {
        embedding: (route == EmbeddingsRoute::Legacy).then(|| vectors[0].as_slice()),
        embeddings: &vectors,
    };
    let encoded = serde_json::to_vec(&body)
        .map_err(|err| RelayError::Internal(format!("Failed to encode response: {err}")))?;
    Ok(ok_json_response(Bytes::from(encoded)))
}
