use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use super::event::{parse_line, UpstreamEvent, UsageStats};
use super::lines::{LineReassembler, Lines, DEFAULT_MAX_LINE_BYTES};
use super::profile::{
    encode_error_line, OutputProfile, OutputRecord, RecordEncoder, TerminalMetrics,
    TerminalRecord, Timings,
};
use super::TranscodeError;

const DEFAULT_DONE_REASON: &str = "stop";
const LOGGED_LINE_MAX_CHARS: usize = 200;

/// Per-session knobs, handed in by the caller rather than read from
/// process-wide configuration.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub max_line_bytes: usize,
    pub default_done_reason: Arc<str>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            default_done_reason: Arc::from(DEFAULT_DONE_REASON),
        }
    }
}

/// Lifecycle of one transcoded response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Reading upstream chunks.
    Streaming,
    /// Upstream signalled completion or ended; terminal record pending.
    Done,
    /// Terminal record written, or the session was aborted.
    Closed,
}

/// Transcodes one upstream chat-completion stream into Ollama NDJSON records.
///
/// Chunks must be pushed in arrival order; each content fragment becomes
/// exactly one in-progress record and exactly one terminal record is
/// produced, always last.
pub struct TranscodeSession {
    state: SessionState,
    lines: LineReassembler,
    encoder: RecordEncoder,
    default_done_reason: Arc<str>,
    started_at: Instant,
    first_token_at: Option<Instant>,
    deltas: u64,
    parse_errors: u64,
    completion: Option<(Option<String>, UsageStats)>,
    terminal_written: bool,
}

impl TranscodeSession {
    #[must_use]
    pub fn new(
        profile: OutputProfile,
        model: impl Into<Arc<str>>,
        settings: &StreamSettings,
        started_at: Instant,
    ) -> Self {
        Self {
            state: SessionState::Streaming,
            lines: LineReassembler::new(settings.max_line_bytes),
            encoder: RecordEncoder::new(profile, model.into()),
            default_done_reason: Arc::clone(&settings.default_done_reason),
            started_at,
            first_token_at: None,
            deltas: 0,
            parse_errors: 0,
            completion: None,
            terminal_written: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn profile(&self) -> OutputProfile {
        self.encoder.profile()
    }

    /// Number of in-progress records emitted so far.
    #[must_use]
    pub fn deltas_emitted(&self) -> u64 {
        self.deltas
    }

    #[must_use]
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    /// Feed one upstream chunk, appending any produced records to `out`.
    ///
    /// An upstream completion signal inside the chunk closes the session and
    /// appends the terminal record. Chunks pushed after that are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::MalformedStream`] when a line exceeds the
    /// configured bound. Records for lines completed before the overflow are
    /// still appended; the session is closed without a terminal record.
    pub fn push_chunk(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<(), TranscodeError> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }

        let mut lines = Lines::new();
        let fed = self.lines.feed_into(chunk, &mut lines);
        for line in &lines {
            self.handle_line(line, out);
            if self.state != SessionState::Streaming {
                break;
            }
        }

        if self.state == SessionState::Done {
            self.close(out);
            return Ok(());
        }
        if let Err(err) = fed {
            self.state = SessionState::Closed;
            return Err(err);
        }
        Ok(())
    }

    /// Upstream end-of-stream: drain the trailing partial line and append the
    /// terminal record. No-op once closed.
    pub fn finish(&mut self, out: &mut Vec<Bytes>) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Done;
        self.close(out);
    }

    /// Abort on a transport or framing failure: append the in-band error line
    /// instead of a terminal record. Records already emitted stay as they are;
    /// a session that already wrote its terminal record is left untouched.
    pub fn fail(&mut self, err: &TranscodeError, out: &mut Vec<Bytes>) {
        if self.terminal_written {
            return;
        }
        tracing::error!(
            profile = self.profile().as_str(),
            model = self.encoder.model(),
            records = self.deltas,
            error = %err,
            "upstream stream aborted"
        );
        self.state = SessionState::Closed;
        out.push(encode_error_line(&err.to_string()));
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<Bytes>) {
        match parse_line(line) {
            UpstreamEvent::ContentDelta { text } => self.emit_delta(text, out),
            UpstreamEvent::Completion {
                reason,
                usage,
                content,
            } => {
                if let Some(text) = content {
                    self.emit_delta(text, out);
                }
                if self.completion.is_none() {
                    self.completion = Some((reason, usage));
                }
                self.state = SessionState::Done;
            }
            UpstreamEvent::Ignorable => {}
            UpstreamEvent::ParseError { raw } => {
                self.parse_errors += 1;
                tracing::warn!(
                    profile = self.profile().as_str(),
                    line = %truncate_for_log(&raw),
                    "skipping undecodable upstream line"
                );
            }
        }
    }

    fn emit_delta(&mut self, text: String, out: &mut Vec<Bytes>) {
        if self.first_token_at.is_none() {
            self.first_token_at = Some(Instant::now());
        }
        self.deltas += 1;
        out.push(self.encoder.encode(&OutputRecord::Delta(text)));
    }

    fn close(&mut self, out: &mut Vec<Bytes>) {
        // Anything buffered after a completion line is discarded, whether or
        // not its terminator has arrived yet.
        let tail = self.lines.flush();
        if let (Some(line), None) = (tail, self.completion.as_ref()) {
            self.handle_line(&line, out);
        }

        let (reason, usage) = self.completion.take().unwrap_or_default();
        let timings = Timings {
            started_at: self.started_at,
            first_token_at: self.first_token_at,
            finished_at: Instant::now(),
        };
        let metrics = TerminalMetrics::resolve(&usage, &timings, self.deltas);
        let done_reason = reason.unwrap_or_else(|| self.default_done_reason.to_string());

        tracing::info!(
            profile = self.profile().as_str(),
            model = self.encoder.model(),
            records = self.deltas,
            parse_errors = self.parse_errors,
            done_reason = %done_reason,
            eval_count = metrics.eval_count,
            total_duration_ms = metrics.total_duration / 1_000_000,
            "stream complete"
        );

        let terminal = TerminalRecord {
            done_reason,
            metrics,
            context: usage.context.unwrap_or_default(),
        };
        out.push(self.encoder.encode(&OutputRecord::Terminal(terminal)));
        self.terminal_written = true;
        self.state = SessionState::Closed;
    }
}

impl Drop for TranscodeSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            tracing::debug!(
                profile = self.profile().as_str(),
                model = self.encoder.model(),
                records = self.deltas,
                "stream torn down before completion"
            );
        }
    }
}

fn truncate_for_log(raw: &str) -> &str {
    match raw.char_indices().nth(LOGGED_LINE_MAX_CHARS) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
