//! Server-sent-events framing.
//!
//! [`SseDecoder`] turns arbitrarily chunked bytes into the JSON objects carried
//! on `data:` lines. It only splits on complete newlines, so a chunk boundary
//! in the middle of a line or of a multi-byte character never corrupts a frame.
//! [`FrameStream`] drives the decoder from a response body.

use fhirassist_core::FhirAssistResult;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Raw response body chunks, in arrival order.
pub type ByteStream = BoxStream<'static, FhirAssistResult<Vec<u8>>>;

/// Incremental `data:` line decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    carry: Vec<u8>,
    dropped: u64,
}

impl SseDecoder {
    /// Empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.carry.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            match decode_line(&self.carry[start..end]) {
                Line::Frame(value) => frames.push(value),
                Line::Malformed => self.dropped += 1,
                Line::Ignored => {}
            }
            start = end + 1;
        }
        self.carry.drain(..start);
        frames
    }

    /// Decodes whatever is left once the transport has closed.
    ///
    /// A final `data:` line without a trailing newline still counts.
    pub fn finish(&mut self) -> Vec<Value> {
        let rest = std::mem::take(&mut self.carry);
        match decode_line(&rest) {
            Line::Frame(value) => vec![value],
            Line::Malformed => {
                self.dropped += 1;
                Vec::new()
            }
            Line::Ignored => Vec::new(),
        }
    }

    /// Number of `data:` lines dropped because they were not JSON objects.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

enum Line {
    Frame(Value),
    Malformed,
    Ignored,
}

fn decode_line(raw: &[u8]) -> Line {
    if raw.is_empty() {
        return Line::Ignored;
    }
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Dropping SSE line with invalid UTF-8");
            return Line::Malformed;
        }
    };
    let line = line.strip_suffix('\r').unwrap_or(line);

    let Some(data) = line.strip_prefix("data:") else {
        return Line::Ignored;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);
    let trimmed = data.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return Line::Ignored;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Line::Frame(value),
        Ok(other) => {
            warn!(data = %trimmed, kind = ?other, "Dropping SSE data that is not a JSON object");
            Line::Malformed
        }
        Err(e) => {
            warn!(data = %trimmed, error = %e, "Failed to parse SSE data");
            Line::Malformed
        }
    }
}

/// Pulls decoded frames out of a response body.
///
/// Not seekable: each frame is yielded exactly once, in arrival order. The
/// sequence ends when the body ends or yields a transport error.
pub struct FrameStream {
    body: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<Value>,
    finished: bool,
    bytes_seen: u64,
}

impl FrameStream {
    /// Frames decoded from `body`.
    pub fn new(body: ByteStream) -> Self {
        Self {
            body,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
            bytes_seen: 0,
        }
    }

    /// Next frame, a transport error, or `None` at end of stream.
    pub async fn next_frame(&mut self) -> Option<FhirAssistResult<Value>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if self.finished {
                return None;
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.bytes_seen += chunk.len() as u64;
                    self.pending.extend(self.decoder.feed(&chunk));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    self.pending.extend(self.decoder.finish());
                    debug!(
                        bytes = self.bytes_seen,
                        dropped = self.decoder.dropped(),
                        "SSE body closed"
                    );
                }
            }
        }
    }

    /// Total body bytes received so far.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }
}
