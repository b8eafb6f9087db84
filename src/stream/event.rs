//! Upstream line classification.
//!
//! Accepts both SSE-framed (`data: {...}`) and bare JSON lines, in either the
//! OpenAI chat-chunk shape or the Ollama NDJSON shape, without configuration.
use serde::Deserialize;

/// Literal end-of-stream marker used by SSE-framed upstreams.
pub const STREAM_END_SENTINEL: &str = "[DONE]";

/// One complete upstream line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    ContentDelta {
        text: String,
    },
    /// The upstream signalled completion. `content` carries a fragment sent
    /// on the same line as the finish flag.
    Completion {
        reason: Option<String>,
        usage: UsageStats,
        content: Option<String>,
    },
    Ignorable,
    ParseError {
        raw: String,
    },
}

/// Usage and timing figures an upstream may attach to its final record.
///
/// Every field is optional; absence is normal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub prompt_eval_count: Option<u64>,
    pub eval_count: Option<u64>,
    pub total_duration: Option<u64>,
    pub load_duration: Option<u64>,
    pub prompt_eval_duration: Option<u64>,
    pub eval_duration: Option<u64>,
    pub context: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Option<Vec<WireChoice>>,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    load_duration: Option<u64>,
    #[serde(default)]
    prompt_eval_duration: Option<u64>,
    #[serde(default)]
    eval_duration: Option<u64>,
    #[serde(default)]
    context: Option<Vec<i64>>,
    #[serde(default)]
    error: Option<serde::de::IgnoredAny>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

/// Classify one complete upstream line.
///
/// Never fails: undecodable payloads come back as
/// [`UpstreamEvent::ParseError`] carrying the original line.
#[must_use]
pub fn parse_line(line: &str) -> UpstreamEvent {
    let Some(payload) = line_payload(line) else {
        return UpstreamEvent::Ignorable;
    };

    match serde_json::from_str::<WireChunk>(payload) {
        Ok(chunk) => classify(chunk, line),
        Err(_) => UpstreamEvent::ParseError {
            raw: line.to_owned(),
        },
    }
}

/// Strip framing and return the JSON payload, or `None` for lines that carry
/// no content event (blank, keep-alive comment, SSE field lines, sentinel).
fn line_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => {
            if is_sse_field_line(trimmed) {
                return None;
            }
            trimmed
        }
    };

    if payload.is_empty() || payload == STREAM_END_SENTINEL {
        return None;
    }
    Some(payload)
}

#[inline]
fn is_sse_field_line(line: &str) -> bool {
    line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:")
}

fn classify(mut chunk: WireChunk, line: &str) -> UpstreamEvent {
    if chunk.error.is_some() {
        return UpstreamEvent::ParseError {
            raw: line.to_owned(),
        };
    }

    let mut first_choice = chunk
        .choices
        .take()
        .and_then(|choices| choices.into_iter().next());

    let finish_reason = first_choice
        .as_mut()
        .and_then(|choice| choice.finish_reason.take());
    let fragment = first_choice
        .and_then(|choice| {
            choice
                .delta
                .and_then(|delta| delta.content)
                .or_else(|| choice.message.and_then(|message| message.content))
                .or(choice.text)
        })
        .or_else(|| chunk.message.take().and_then(|message| message.content))
        .or_else(|| chunk.response.take())
        .filter(|text| !text.is_empty());

    let completed = finish_reason.is_some() || chunk.done == Some(true);
    if completed {
        let reason = finish_reason.or_else(|| chunk.done_reason.take());
        return UpstreamEvent::Completion {
            reason,
            usage: usage_stats(chunk),
            content: fragment,
        };
    }

    match fragment {
        Some(text) => UpstreamEvent::ContentDelta { text },
        None => UpstreamEvent::Ignorable,
    }
}

fn usage_stats(chunk: WireChunk) -> UsageStats {
    let usage = chunk.usage;
    UsageStats {
        prompt_eval_count: usage
            .as_ref()
            .and_then(|usage| usage.prompt_tokens)
            .or(chunk.prompt_eval_count),
        eval_count: usage
            .as_ref()
            .and_then(|usage| usage.completion_tokens)
            .or(chunk.eval_count),
        total_duration: chunk.total_duration,
        load_duration: chunk.load_duration,
        prompt_eval_duration: chunk.prompt_eval_duration,
        eval_duration: chunk.eval_duration,
        context: chunk.context,
    }
}
