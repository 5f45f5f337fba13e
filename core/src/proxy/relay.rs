//! Server-Sent-Events relay
//!
//! Upstream bytes are cut into `data:` records at blank lines. Each record is
//! forwarded downstream byte-for-byte, and partial-image and completion records
//! are also handed to the registered sinks. The relay itself never touches a
//! socket: [`StreamRelay`] works on byte chunks, and [`relay_stream`] adapts it
//! to any upstream byte stream.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::proxy::error::ProxyError;
use crate::proxy::mappers::image_result::{classify_record, CompletedImage, PartialImage, StreamEvent};

/// One blank-line terminated record as received from upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    /// Exact bytes, terminator included
    pub raw: Bytes,
    /// `data:` lines joined with `\n`; `None` if the record had none
    pub data: Option<String>,
}

impl SseRecord {
    fn parse(raw: Bytes) -> Option<Self> {
        let text = String::from_utf8_lossy(&raw);
        let mut has_content = false;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            has_content = true;
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
            }
        }

        if !has_content {
            return None;
        }

        let data = if data_lines.is_empty() {
            None
        } else {
            Some(data_lines.join("\n"))
        };
        Some(Self { raw, data })
    }
}

/// Incremental record framer
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    /// Start of the first line not yet checked for blankness
    line_start: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, get back every record it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut pos = self.line_start;
        while let Some(offset) = self.buffer[pos..].iter().position(|&b| b == b'\n') {
            let end = pos + offset;
            let blank = matches!(&self.buffer[pos..end], [] | [b'\r']);
            pos = end + 1;

            if blank {
                let raw = self.buffer.split_to(pos).freeze();
                pos = 0;
                if let Some(record) = SseRecord::parse(raw) {
                    records.push(record);
                }
            }
        }
        self.line_start = pos;
        records
    }

    /// Flush an unterminated trailing record at end of stream
    pub fn finish(&mut self) -> Option<SseRecord> {
        self.line_start = 0;
        if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
            self.buffer.clear();
            return None;
        }

        let mut raw = std::mem::take(&mut self.buffer);
        if raw.ends_with(b"\n") {
            raw.extend_from_slice(b"\n");
        } else {
            raw.extend_from_slice(b"\n\n");
        }
        SseRecord::parse(raw.freeze())
    }
}

/// Receives classified events as they pass through the relay
pub trait RelaySink: Send {
    fn on_partial_image(&mut self, _partial: &PartialImage) {}

    fn on_completed(&mut self, _completed: &CompletedImage) {}
}

/// Logs frames under a request's trace id
pub struct LogSink {
    trace_id: String,
}

impl LogSink {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self { trace_id: trace_id.into() }
    }
}

impl RelaySink for LogSink {
    fn on_partial_image(&mut self, partial: &PartialImage) {
        debug!(
            "[{}] Partial image {} ({} bytes b64)",
            self.trace_id,
            partial.index,
            partial.image_b64.len()
        );
    }

    fn on_completed(&mut self, completed: &CompletedImage) {
        info!(
            "[{}] Image completed | Response: {} | {} bytes b64",
            self.trace_id,
            completed.response_id.as_deref().unwrap_or("-"),
            completed.image_b64.len()
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed(CompletedImage),
    /// Stream ended (or completed) without an image
    NoResult,
    /// Stream ended without an image and none was asked for
    Passthrough,
}

pub struct StreamRelay {
    decoder: SseDecoder,
    sinks: Vec<Box<dyn RelaySink>>,
    last_partial_index: Option<u32>,
    completion: Option<Option<CompletedImage>>,
    dropped_frames: usize,
    /// Whether ending without an image is a failure
    image_required: bool,
}

impl Default for StreamRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRelay {
    pub fn new() -> Self {
        Self {
            decoder: SseDecoder::new(),
            sinks: Vec::new(),
            last_partial_index: None,
            completion: None,
            dropped_frames: 0,
            image_required: true,
        }
    }

    /// `false` relays streams that may finish without an image, e.g. plain text
    pub fn require_image(mut self, required: bool) -> Self {
        self.image_required = required;
        self
    }

    pub fn with_sink(mut self, sink: impl RelaySink + 'static) -> Self {
        self.add_sink(Box::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn RelaySink>) {
        self.sinks.push(sink);
    }

    /// A completion record has been forwarded; nothing more will be
    pub fn is_done(&self) -> bool {
        self.completion.is_some()
    }

    /// Records skipped as malformed or out of order
    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    /// Feed upstream bytes, get back the records to forward downstream
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        if self.is_done() {
            return Vec::new();
        }

        let mut forward = Vec::new();
        for record in self.decoder.push(chunk) {
            if let Some(raw) = self.handle(record) {
                forward.push(raw);
            }
            if self.is_done() {
                break;
            }
        }
        forward
    }

    /// End of upstream. Returns any trailing record and the overall outcome.
    pub fn finish(&mut self) -> (Option<Bytes>, RelayOutcome) {
        let trailing = if self.is_done() {
            None
        } else {
            self.decoder.finish().and_then(|record| self.handle(record))
        };

        let outcome = match self.completion.clone().flatten() {
            Some(image) => RelayOutcome::Completed(image),
            None if self.image_required => RelayOutcome::NoResult,
            None => RelayOutcome::Passthrough,
        };
        (trailing, outcome)
    }

    fn handle(&mut self, record: SseRecord) -> Option<Bytes> {
        let Some(data) = record.data.as_deref() else {
            return Some(record.raw);
        };
        if data.trim() == "[DONE]" {
            return Some(record.raw);
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                self.dropped_frames += 1;
                warn!("Skipping malformed stream frame ({} bytes): {}", data.len(), e);
                return None;
            }
        };

        match classify_record(&value) {
            StreamEvent::PartialImage(partial) => {
                if self.last_partial_index.is_some_and(|last| partial.index < last) {
                    self.dropped_frames += 1;
                    warn!(
                        "Dropping out-of-order partial image {} (already sent {:?})",
                        partial.index, self.last_partial_index
                    );
                    return None;
                }
                self.last_partial_index = Some(partial.index);
                for sink in self.sinks.iter_mut() {
                    sink.on_partial_image(&partial);
                }
            }
            StreamEvent::Completed(image) => {
                if let Some(image) = &image {
                    for sink in self.sinks.iter_mut() {
                        sink.on_completed(image);
                    }
                }
                self.completion = Some(image);
            }
            StreamEvent::Other => {}
        }

        Some(record.raw)
    }
}

/// Drive `relay` over an upstream byte stream, yielding downstream records.
///
/// Upstream is read one chunk at a time, only when the consumer polls, and is
/// dropped together with the returned stream. A stream that ends without an
/// image gets a trailing `no_result` error record, unless the relay was built
/// with `require_image(false)`.
pub fn relay_stream<S, E>(
    upstream: S,
    mut relay: StreamRelay,
    idle_timeout: Duration,
    trace_id: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut guard = AbortGuard::new(trace_id.clone());
        let mut upstream = Box::pin(upstream);

        loop {
            match tokio::time::timeout(idle_timeout, upstream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    for record in relay.push(&chunk) {
                        yield Ok(record);
                    }
                    if relay.is_done() {
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    let err = ProxyError::StreamInterrupted(e.to_string());
                    error!("[{}] Stream broke ({}): {}", trace_id, err.category(), err);
                    guard.disarm();
                    yield Ok(err.to_sse_record());
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    let err = ProxyError::Timeout(idle_timeout);
                    error!("[{}] Stream idle: {}", trace_id, err);
                    guard.disarm();
                    yield Ok(err.to_sse_record());
                    return;
                }
            }
        }

        let (trailing, outcome) = relay.finish();
        if let Some(record) = trailing {
            yield Ok(record);
        }
        guard.disarm();

        match outcome {
            RelayOutcome::Completed(_) | RelayOutcome::Passthrough => {
                debug!("[{}] Stream relay finished ({} frames dropped)", trace_id, relay.dropped_frames());
            }
            RelayOutcome::NoResult => {
                let err = ProxyError::NoResult;
                error!("[{}] Stream ended without an image", trace_id);
                yield Ok(err.to_sse_record());
            }
        }
    }
}

/// Logs relays dropped before upstream finished, i.e. client disconnects
struct AbortGuard {
    trace_id: String,
    armed: bool,
}

impl AbortGuard {
    fn new(trace_id: String) -> Self {
        Self { trace_id, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("[{}] Client went away mid-stream, upstream connection released", self.trace_id);
        }
    }
}
