//! Frame decoding for the streaming protocol
//!
//! Frames are server-sent-event blocks separated by a blank line. Each
//! `data:` line carries a JSON payload with a content fragment, an error
//! message, or a completion flag:
//!
//! ```text
//! data: {"content": "Hello"}
//!
//! data: {"done": true}
//! ```

use crate::llm::LlmError;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use thiserror::Error;

const DATA_FIELD: &str = "data:";

/// A decoded protocol event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content { text: String },
    Done,
    Error { message: String },
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        StreamEvent::Content { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends the sequence
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// A single frame whose payload could not be parsed
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
struct FramePayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

/// Encode an event as a complete frame, delimiter included
pub fn encode_frame(event: &StreamEvent) -> String {
    let payload = match event {
        StreamEvent::Content { text } => json!({ "content": text }),
        StreamEvent::Done => json!({ "done": true }),
        StreamEvent::Error { message } => json!({ "error": message }),
    };
    format!("{DATA_FIELD} {payload}\n\n")
}

/// Parse one frame payload into the events it carries.
///
/// An error payload yields only the error. Otherwise a non-empty content
/// fragment comes first, followed by `Done` when the completion flag is set.
fn parse_payload(data: &str) -> Result<Vec<StreamEvent>, FrameError> {
    let payload: FramePayload = serde_json::from_str(data)?;

    if let Some(message) = payload.error {
        return Ok(vec![StreamEvent::Error { message }]);
    }

    let mut events = Vec::with_capacity(2);
    if let Some(text) = payload.content.filter(|t| !t.is_empty()) {
        events.push(StreamEvent::Content { text });
    }
    if payload.done {
        events.push(StreamEvent::Done);
    }
    Ok(events)
}

/// Splits raw event-stream bytes into frame payloads.
///
/// Lines are only cut at `\n`, so chunk boundaries (including ones that fall
/// inside a multi-byte character) never change the result.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the payloads of all frames it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let raw = String::from_utf8_lossy(&self.pending[consumed..end]);
            let line = raw.strip_suffix('\r').unwrap_or(&raw);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    payloads.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(value) = line.strip_prefix(DATA_FIELD) {
                self.data_lines
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // Comments (":ping") and other fields (event:, id:) carry nothing for us

            consumed = end + 1;
        }
        self.pending.drain(..consumed);

        payloads
    }

    /// Whether an incomplete frame is buffered
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty() || !self.data_lines.is_empty()
    }
}

/// Incremental decoder from bytes to [`StreamEvent`]s
#[derive(Debug, Default)]
pub struct FrameDecoder {
    frames: FrameBuffer,
    finished: bool,
    skipped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect the events of every frame it completed.
    ///
    /// Malformed frames are logged and skipped. Nothing is produced after a
    /// terminal event.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        for payload in self.frames.push(chunk) {
            match parse_payload(&payload) {
                Ok(parsed) => {
                    for event in parsed {
                        let terminal = event.is_terminal();
                        events.push(event);
                        if terminal {
                            self.finished = true;
                            return events;
                        }
                    }
                }
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, payload = %payload, "Skipping malformed frame");
                }
            }
        }

        events
    }

    /// Whether a terminal event has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of frames dropped because their payload did not parse
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    pub fn has_partial_frame(&self) -> bool {
        self.frames.has_partial()
    }
}

struct DecodeState<S> {
    chunks: S,
    decoder: FrameDecoder,
    ready: VecDeque<StreamEvent>,
    exhausted: bool,
}

/// Lazily decode a chunked byte stream into a finite event sequence.
///
/// The sequence always ends with exactly one terminal event: the stream's
/// own `Done`/`Error`, an `Error` carrying a transport failure, or an
/// `Error` when input ends before any completion marker.
pub fn decode_stream<S>(chunks: S) -> impl Stream<Item = StreamEvent> + Send
where
    S: Stream<Item = Result<Vec<u8>, LlmError>> + Send + Unpin,
{
    let state = DecodeState {
        chunks,
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((event, state));
            }
            if state.exhausted || state.decoder.is_finished() {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.ready.extend(events);
                }
                Some(Err(e)) => {
                    state.exhausted = true;
                    state.ready.push_back(StreamEvent::error(e.message));
                }
                None => {
                    state.exhausted = true;
                    if state.decoder.has_partial_frame() {
                        tracing::debug!("Discarding unterminated trailing frame");
                    }
                    tracing::debug!(
                        skipped_frames = state.decoder.skipped_frames(),
                        "Frame stream ended before completion"
                    );
                    state
                        .ready
                        .push_back(StreamEvent::error("stream ended before completion"));
                }
            }
        }
    })
}
