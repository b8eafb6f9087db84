use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ndjson_ok_response, ok_json_response, SamplingParams};
use crate::error::{sanitize_upstream_error, RelayError};
use crate::state::AppState;
use crate::stream::profile::Timings;
use crate::stream::{
    ndjson_stream, parse_line, OutputProfile, RecordEncoder, TerminalMetrics, TerminalRecord,
    TranscodeSession, UpstreamEvent, UsageStats,
};

/// Chat message as forwarded upstream. Ollama-only fields such as `images`
/// are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct UpstreamMessage {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

fn default_role() -> String {
    "user".to_string()
}

impl UpstreamMessage {
    pub(crate) fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// OpenAI chat-completion request body.
#[derive(Debug, Serialize)]
pub(crate) struct UpstreamChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<UpstreamMessage>,
    pub stream: bool,
    #[serde(flatten)]
    pub params: SamplingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// Send `request` to the chat upstream and answer in the Ollama shape
/// selected by `profile`, echoing `client_model`.
///
/// Streaming requests answer with an NDJSON body fed by the upstream body as
/// it arrives; anything that fails after that point is reported in-band.
pub(crate) async fn relay_completion(
    state: &AppState,
    profile: OutputProfile,
    client_model: &str,
    request: &UpstreamChatRequest<'_>,
) -> Result<Response, RelayError> {
    let started_at = Instant::now();
    let body = serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(|err| RelayError::Internal(format!("Failed to encode upstream request: {err}")))?;

    let response = state
        .upstream
        .post_json(
            state.chat_url(),
            &state.config.upstream.api_key,
            body,
            request.stream,
        )
        .await?;
    let model: Arc<str> = Arc::from(client_model);

    if request.stream {
        let session = TranscodeSession::new(profile, model, state.stream_settings(), started_at);
        let records = ndjson_stream(response.bytes_stream(), session);
        return Ok(ndjson_ok_response(Body::from_stream(records)));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|err| RelayError::Transport(format!("Failed to read upstream body: {err}")))?;
    let encoder = RecordEncoder::new(profile, model);
    let encoded = encode_whole_response(
        &encoder,
        &bytes,
        started_at,
        &state.stream_settings().default_done_reason,
    )?;
    Ok(ok_json_response(encoded))
}

/// Remap a complete (non-streamed) upstream answer into one `done: true`
/// Ollama object.
pub(crate) fn encode_whole_response(
    encoder: &RecordEncoder,
    body: &[u8],
    started_at: Instant,
    default_done_reason: &str,
) -> Result<Bytes, RelayError> {
    let text = String::from_utf8_lossy(body);
    let (content, reason, mut usage) = match parse_line(&text) {
        UpstreamEvent::Completion {
            reason,
            usage,
            content,
        } => (content.unwrap_or_default(), reason, usage),
        UpstreamEvent::ContentDelta { text } => (text, None, UsageStats::default()),
        UpstreamEvent::Ignorable => (String::new(), None, UsageStats::default()),
        UpstreamEvent::ParseError { .. } => {
            return Err(RelayError::Upstream {
                status: http::StatusCode::BAD_GATEWAY.as_u16(),
                message: format!(
                    "Unrecognized upstream response: {}",
                    sanitize_upstream_error(body)
                ),
            });
        }
    };

    let timings = Timings {
        started_at,
        first_token_at: None,
        finished_at: Instant::now(),
    };
    let context = usage.context.take().unwrap_or_default();
    let terminal = TerminalRecord {
        done_reason: reason.unwrap_or_else(|| default_done_reason.to_string()),
        metrics: TerminalMetrics::resolve(&usage, &timings, u64::from(!content.is_empty())),
        context,
    };
    Ok(encoder.encode_complete(&content, &terminal))
}
