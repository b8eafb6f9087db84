use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::event::UsageStats;

const ASSISTANT_ROLE: &str = "assistant";

/// Output-shape policy: which Ollama endpoint the records are written for.
///
/// The two shapes differ only in where the content fragment goes and
/// whether the terminal record carries `context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputProfile {
    /// `/api/chat`: fragment under `message.content`.
    Chat,
    /// `/api/generate`: fragment under `response`, terminal adds `context`.
    Completion,
}

impl OutputProfile {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OutputProfile::Chat => "chat",
            OutputProfile::Completion => "completion",
        }
    }

    #[must_use]
    pub fn carries_context(self) -> bool {
        matches!(self, OutputProfile::Completion)
    }
}

/// Timing and count fields of a terminal record, in Ollama units
/// (durations in nanoseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TerminalMetrics {
    pub total_duration: u64,
    pub load_duration: u64,
    pub prompt_eval_count: u64,
    pub prompt_eval_duration: u64,
    pub eval_count: u64,
    pub eval_duration: u64,
}

/// Wall-clock marks of one request used to fill metrics the upstream omitted.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub started_at: Instant,
    pub first_token_at: Option<Instant>,
    pub finished_at: Instant,
}

impl TerminalMetrics {
    /// Upstream-supplied values win; anything missing is measured locally.
    ///
    /// `produced` is the number of content records emitted and stands in for
    /// `eval_count` when the upstream reports no completion token count.
    #[must_use]
    pub fn resolve(usage: &UsageStats, timings: &Timings, produced: u64) -> Self {
        let total = nanos(timings.finished_at.saturating_duration_since(timings.started_at));
        let (prompt_eval, eval) = match timings.first_token_at {
            Some(first) => (
                nanos(first.saturating_duration_since(timings.started_at)),
                nanos(timings.finished_at.saturating_duration_since(first)),
            ),
            None => (0, 0),
        };

        Self {
            total_duration: usage.total_duration.unwrap_or(total),
            load_duration: usage.load_duration.unwrap_or(0),
            prompt_eval_count: usage.prompt_eval_count.unwrap_or(0),
            prompt_eval_duration: usage.prompt_eval_duration.unwrap_or(prompt_eval),
            eval_count: usage.eval_count.unwrap_or(produced),
            eval_duration: usage.eval_duration.unwrap_or(eval),
        }
    }
}

#[inline]
fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Summary data written once, on the `done: true` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalRecord {
    pub done_reason: String,
    pub metrics: TerminalMetrics,
    pub context: Vec<i64>,
}

/// One outbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRecord {
    /// In-progress record carrying one content fragment, `done: false`.
    Delta(String),
    /// The single `done: true` record closing the stream.
    Terminal(TerminalRecord),
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRecord<'a> {
    model: &'a str,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a str>,
    done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    done_reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a [i64]>,
    #[serde(flatten)]
    metrics: Option<TerminalMetrics>,
}

#[derive(Serialize)]
struct WireError<'a> {
    error: &'a str,
}

/// Serializes records in the shape selected by an [`OutputProfile`].
#[derive(Debug, Clone)]
pub struct RecordEncoder {
    profile: OutputProfile,
    model: Arc<str>,
}

impl RecordEncoder {
    #[must_use]
    pub fn new(profile: OutputProfile, model: Arc<str>) -> Self {
        Self { profile, model }
    }

    #[must_use]
    pub fn profile(&self) -> OutputProfile {
        self.profile
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Encode one streamed record as a newline-terminated JSON line.
    #[must_use]
    pub fn encode(&self, record: &OutputRecord) -> Bytes {
        let mut out = match record {
            OutputRecord::Delta(content) => self.render(content, None),
            OutputRecord::Terminal(terminal) => self.render("", Some(terminal)),
        };
        out.push(b'\n');
        Bytes::from(out)
    }

    /// Encode a whole, non-streamed response: full content plus terminal data
    /// in one `done: true` object.
    #[must_use]
    pub fn encode_complete(&self, content: &str, terminal: &TerminalRecord) -> Bytes {
        Bytes::from(self.render(content, Some(terminal)))
    }

    fn render(&self, content: &str, terminal: Option<&TerminalRecord>) -> Vec<u8> {
        let (message, response) = match self.profile {
            OutputProfile::Chat => (
                Some(WireMessage {
                    role: ASSISTANT_ROLE,
                    content,
                }),
                None,
            ),
            OutputProfile::Completion => (None, Some(content)),
        };
        let context = terminal
            .filter(|_| self.profile.carries_context())
            .map(|terminal| terminal.context.as_slice());

        let wire = WireRecord {
            model: &self.model,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            message,
            response,
            done: terminal.is_some(),
            done_reason: terminal.map(|terminal| terminal.done_reason.as_str()),
            context,
            metrics: terminal.map(|terminal| terminal.metrics),
        };
        // Serializing plain structs of strings and integers cannot fail.
        serde_json::to_vec(&wire).unwrap_or_default()
    }
}

/// Encode the in-band error line that ends an aborted stream.
#[must_use]
pub fn encode_error_line(message: &str) -> Bytes {
    let mut out = serde_json::to_vec(&WireError { error: message }).unwrap_or_default();
    out.push(b'\n');
    Bytes::from(out)
}
