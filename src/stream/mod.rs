//! Upstream chat-completion stream → Ollama NDJSON transcoding.
//!
//! Layers, bottom-up: [`lines`] reassembles byte chunks into lines,
//! [`event`] classifies each line, [`transcoder`] runs the per-response
//! state machine and [`body`] drives it from an async byte stream.

pub mod body;
pub mod event;
pub mod lines;
pub mod profile;
pub mod transcoder;

pub use body::ndjson_stream;
pub use event::{parse_line, UpstreamEvent, UsageStats};
pub use lines::LineReassembler;
pub use profile::{OutputProfile, OutputRecord, RecordEncoder, TerminalMetrics, TerminalRecord};
pub use transcoder::{SessionState, StreamSettings, TranscodeSession};

/// Fatal stream-layer failures. Undecodable single lines are not errors;
/// see [`UpstreamEvent::ParseError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    #[error("malformed upstream stream: line exceeded {limit} bytes without a terminator")]
    MalformedStream { limit: usize },
    #[error("upstream stream error: {0}")]
    Stream(String),
}
