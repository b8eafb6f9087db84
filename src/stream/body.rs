//! Async driver turning an upstream byte stream into an NDJSON body stream.
use std::convert::Infallible;
use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;

use super::transcoder::{SessionState, TranscodeSession};
use super::TranscodeError;

type UpstreamBody<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

struct PendingRecords {
    records: SmallVec<[Bytes; 8]>,
    head: usize,
}

impl PendingRecords {
    #[inline]
    fn new() -> Self {
        Self {
            records: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<Bytes> {
        if self.head >= self.records.len() {
            return None;
        }
        let record = std::mem::take(&mut self.records[self.head]);
        self.head += 1;
        if self.head == self.records.len() {
            self.records.clear();
            self.head = 0;
        }
        Some(record)
    }

    #[inline]
    fn extend_from_vec(&mut self, produced: &mut Vec<Bytes>) {
        if produced.is_empty() {
            return;
        }
        self.records.extend(produced.drain(..));
    }
}

struct Driver<E> {
    upstream: Option<UpstreamBody<E>>,
    session: TranscodeSession,
    produced: Vec<Bytes>,
    pending: PendingRecords,
}

impl<E: Display> Driver<E> {
    /// Pull one upstream item and run it through the session.
    async fn advance(&mut self) {
        let Some(upstream) = self.upstream.as_mut() else {
            return;
        };

        match upstream.next().await {
            Some(Ok(chunk)) => {
                if let Err(err) = self.session.push_chunk(&chunk, &mut self.produced) {
                    self.session.fail(&err, &mut self.produced);
                }
            }
            Some(Err(err)) => {
                let err = TranscodeError::Stream(err.to_string());
                self.session.fail(&err, &mut self.produced);
            }
            None => self.session.finish(&mut self.produced),
        }

        if self.session.state() == SessionState::Closed {
            // Dropping the body cancels the upstream request.
            self.upstream = None;
        }
        self.pending.extend_from_vec(&mut self.produced);
    }
}

/// Drive `session` over `upstream`, yielding one newline-terminated record
/// per item as soon as it is produced.
///
/// Upstream chunks are consumed strictly one at a time. A failing upstream
/// ends the stream with an `{"error": ...}` line instead of a terminal
/// record. Dropping the returned stream drops the upstream body and the
/// session with it.
pub fn ndjson_stream<S, E>(
    upstream: S,
    session: TranscodeSession,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let driver = Driver {
        upstream: Some(Box::pin(upstream) as UpstreamBody<E>),
        session,
        produced: Vec::with_capacity(4),
        pending: PendingRecords::new(),
    };

    futures_util::stream::unfold(driver, |mut driver| async move {
        loop {
            if let Some(record) = driver.pending.pop_front() {
                return Some((Ok(record), driver));
            }
            driver.upstream.as_ref()?;
            driver.advance().await;
        }
    })
}
