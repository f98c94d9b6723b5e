//! Normalization of the upstream run event feed.
//!
//! The feed is a sequence of JSON event envelopes separated by whitespace
//! (usually one per line, often one per transport chunk). Only text parts of
//! `message.delta` events are relayed; everything else is dropped.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use super::error::{RelayError, RelayResult};
use super::types::NormalizedEvent;

const MESSAGE_DELTA: &str = "message.delta";
const TEXT_RESPONSE: &str = "text";

/// Largest incomplete record kept while waiting for the rest of it.
pub const MAX_PENDING_RECORD_BYTES: usize = 1024 * 1024;

type ChunkStream = Pin<Box<dyn Stream<Item = RelayResult<Vec<u8>>> + Send>>;

#[derive(Deserialize)]
struct EventEnvelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Lazy stream of normalized events over one open upstream connection.
///
/// Dropping the stream, or calling [`EventStream::close`], releases the
/// connection. After an upstream failure it yields one error and then ends.
pub struct EventStream {
    chunks: Option<ChunkStream>,
    buffer: Vec<u8>,
    scan: PartialScan,
    pending: VecDeque<NormalizedEvent>,
    session_id: String,
}

impl EventStream {
    pub fn new<S>(chunks: S, session_id: &str) -> Self
    where
        S: Stream<Item = RelayResult<Vec<u8>>> + Send + 'static,
    {
        Self {
            chunks: Some(Box::pin(chunks)),
            buffer: Vec::new(),
            scan: PartialScan::default(),
            pending: VecDeque::new(),
            session_id: session_id.to_string(),
        }
    }

    pub(crate) fn from_response(response: reqwest::Response, session_id: &str) -> Self {
        let chunks = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| RelayError::UpstreamStream(e.to_string()))
        });
        Self::new(chunks, session_id)
    }

    /// Thread the events are attributed to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop consuming and release the upstream connection. Idempotent.
    pub fn close(&mut self) {
        if self.chunks.take().is_some() {
            debug!(thread_id = %self.session_id, "Closed upstream stream");
        }
        self.buffer.clear();
        self.scan = PartialScan::default();
        self.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.chunks.is_none() && self.pending.is_empty()
    }

    fn feed(&mut self, chunk: &[u8]) {
        if self.buffer.is_empty() {
            self.buffer.extend_from_slice(chunk);
            self.drain(0);
        } else if is_standalone_record(chunk) {
            debug!(
                bytes = self.buffer.len(),
                "Dropping stale partial event record"
            );
            self.buffer.clear();
            self.buffer.extend_from_slice(chunk);
            self.drain(0);
        } else {
            let chunk_start = self.buffer.len();
            self.buffer.extend_from_slice(chunk);
            // Re-parse the partial only once it may have ended
            if self.scan.advance(&self.buffer) {
                self.drain(chunk_start);
            }
        }

        if self.buffer.len() > MAX_PENDING_RECORD_BYTES {
            warn!(
                bytes = self.buffer.len(),
                "Discarding oversized partial event record"
            );
            self.buffer.clear();
            self.scan = PartialScan::default();
        }
    }

    fn drain(&mut self, chunk_start: usize) {
        for record in drain_records(&mut self.buffer, chunk_start) {
            normalize_record(record, &self.session_id, &mut self.pending);
        }
        self.scan = PartialScan::default();
        self.scan.advance(&self.buffer);
    }

    fn finish(&mut self) {
        self.chunks = None;
        if !self.buffer.is_empty() {
            self.drain(0);
        }
        if self.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
            debug!(
                bytes = self.buffer.len(),
                "Dropping incomplete trailing event record"
            );
        }
        self.buffer.clear();
    }
}

impl Stream for EventStream {
    type Item = RelayResult<NormalizedEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            let Some(chunks) = this.chunks.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(chunks.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.feed(&chunk),
                Some(Err(e)) => {
                    warn!(thread_id = %this.session_id, error = %e, "Upstream stream broke");
                    this.close();
                    return Poll::Ready(Some(Err(e)));
                }
                None => this.finish(),
            }
        }
    }
}

/// Split every complete record off the front of `buffer`.
///
/// A malformed record is skipped up to the next point where a record may
/// begin (see [`resync_point`]). `chunk_start` is the offset of the newest
/// chunk, or 0 when the buffer holds no older bytes. An incomplete record
/// stays in the buffer.
fn drain_records(buffer: &mut Vec<u8>, chunk_start: usize) -> Vec<serde_json::Value> {
    let mut records = Vec::new();
    let mut consumed = 0;

    while consumed < buffer.len() {
        let rest = &buffer[consumed..];
        let mut values =
            serde_json::Deserializer::from_slice(rest).into_iter::<serde_json::Value>();

        match values.next() {
            None => consumed = buffer.len(),
            Some(Ok(value)) => {
                consumed += values.byte_offset();
                records.push(value);
            }
            Some(Err(e)) if e.is_eof() => break,
            Some(Err(e)) => {
                let start = consumed
                    + rest
                        .iter()
                        .position(|b| !b.is_ascii_whitespace())
                        .unwrap_or(0);
                let next = resync_point(buffer, start, chunk_start);
                trace!(error = %e, skipped = next - consumed, "Skipping malformed event record");
                consumed = next;
            }
        }
    }

    buffer.drain(..consumed);
    records
}

/// Earliest offset after `start` where a record may begin: just past a line
/// break, at the start of the newest chunk, or at a `{` after whitespace.
fn resync_point(buffer: &[u8], start: usize, chunk_start: usize) -> usize {
    (start + 1..buffer.len())
        .find(|&i| {
            buffer[i - 1] == b'\n'
                || i == chunk_start
                || (buffer[i] == b'{' && buffer[i - 1].is_ascii_whitespace())
        })
        .unwrap_or(buffer.len())
}

/// A chunk that is one complete JSON object on its own.
fn is_standalone_record(chunk: &[u8]) -> bool {
    let trimmed = chunk.trim_ascii();
    !trimmed.is_empty()
        && serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(trimmed).is_ok()
}

/// Resumable bracket scan over a pending partial record.
///
/// Tracks nesting outside strings so new bytes are only handed to the
/// deserializer when the record may be complete or a line break gives a
/// resync point.
#[derive(Debug, Default)]
struct PartialScan {
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl PartialScan {
    /// Scan the bytes appended since the last call. Returns true when the
    /// buffer may now hold a complete record or a line break.
    fn advance(&mut self, buffer: &[u8]) -> bool {
        let mut boundary = false;

        for &b in &buffer[self.scanned.min(buffer.len())..] {
            if self.in_string {
                match b {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => {
                        self.in_string = false;
                        boundary |= self.depth == 0;
                    }
                    b'\n' => boundary = true,
                    _ => {}
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    boundary |= self.depth == 0;
                }
                b'\n' => boundary = true,
                _ => {}
            }
        }

        self.scanned = buffer.len();
        boundary || (self.depth == 0 && !self.in_string)
    }
}

/// Push one event per text part of a `message.delta` record.
fn normalize_record(
    record: serde_json::Value,
    session_id: &str,
    out: &mut VecDeque<NormalizedEvent>,
) {
    let Ok(envelope) = serde_json::from_value::<EventEnvelope>(record) else {
        trace!("Skipping record without an event envelope");
        return;
    };

    if envelope.event != MESSAGE_DELTA {
        trace!(event = %envelope.event, "Dropping non-delta event");
        return;
    }

    let Some(parts) = envelope
        .data
        .pointer("/delta/content")
        .and_then(|c| c.as_array())
    else {
        return;
    };

    for part in parts {
        if part.get("response_type").and_then(|t| t.as_str()) != Some(TEXT_RESPONSE) {
            continue;
        }
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            out.push_back(NormalizedEvent::text(text, session_id));
        }
    }
}
