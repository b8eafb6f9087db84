/// Line reassembly over an arbitrarily chunked upstream byte stream.
///
/// Upstream bodies arrive in transport-sized pieces that split records at
/// any byte, including inside a multi-byte UTF-8 sequence. Bytes are held
/// until a `\n` shows up, so a line is only decoded once it is whole.
use memchr::memchr;
use smallvec::SmallVec;

use super::TranscodeError;

/// Complete lines produced by one [`LineReassembler::feed`] call.
pub type Lines = SmallVec<[String; 4]>;

/// Default bound on a single unterminated line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

const COMPACT_THRESHOLD_BYTES: usize = 8 * 1024;

/// Incremental newline splitter.
///
/// Holds at most one partial line at any point; everything before the last
/// `\n` seen has already been handed out.
pub struct LineReassembler {
    buffer: Vec<u8>,
    read_offset: usize,
    scan_from: usize,
    max_line_bytes: usize,
}

impl LineReassembler {
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            read_offset: 0,
            scan_from: 0,
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Append a chunk and return every line it completed, in order.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::MalformedStream`] when the pending partial
    /// line grows past the configured bound.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Lines, TranscodeError> {
        let mut out = Lines::new();
        self.feed_into(chunk, &mut out)?;
        Ok(out)
    }

    /// Append a chunk and push completed lines into a caller-provided buffer.
    ///
    /// Lines completed by this chunk are pushed even when the call fails, so
    /// the caller can still deliver them before aborting.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::MalformedStream`] when the pending partial
    /// line grows past the configured bound.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Lines) -> Result<(), TranscodeError> {
        self.buffer.extend_from_slice(chunk);

        let mut line_start = self.read_offset;
        let mut scan = self.scan_from.max(line_start);
        while let Some(rel_pos) = memchr(b'\n', &self.buffer[scan..]) {
            let line_end = scan + rel_pos;
            out.push(decode_line(&self.buffer[line_start..line_end]));
            line_start = line_end + 1;
            scan = line_start;
        }

        self.read_offset = line_start;
        self.scan_from = self.buffer.len();
        self.compact();

        if self.pending_len() > self.max_line_bytes {
            return Err(TranscodeError::MalformedStream {
                limit: self.max_line_bytes,
            });
        }
        Ok(())
    }

    /// Drain the trailing unterminated line, if it holds anything but whitespace.
    pub fn flush(&mut self) -> Option<String> {
        let tail = decode_line(&self.buffer[self.read_offset..]);
        self.buffer.clear();
        self.read_offset = 0;
        self.scan_from = 0;
        if tail.trim().is_empty() {
            None
        } else {
            Some(tail)
        }
    }

    /// Bytes currently held for the partial line.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }

    fn compact(&mut self) {
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            self.scan_from = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2
                || self.read_offset >= COMPACT_THRESHOLD_BYTES);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.scan_from -= self.read_offset;
            self.read_offset = 0;
        }
    }
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

#[inline]
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
