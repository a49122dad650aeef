//! Incremental Server-Sent Events parsing for recorded or live vendor streams.
//!
//! Field handling follows the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).
use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use smallvec::SmallVec;

use crate::error::StreamError;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// OpenAI terminates its streams with a literal `[DONE]` payload.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        if parsed.is_empty() {
            return;
        }
        self.events.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// SseParser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Chunks may split lines and frames at arbitrary byte positions.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return the events it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append completed events to `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let buffer = std::mem::take(&mut self.buffer);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &buffer[processed_up_to..line_end];
            self.process_line(line.strip_suffix('\r').unwrap_or(line), out);
            processed_up_to = line_end + 1;
        }
        self.buffer = buffer;

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        if self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024)
        {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// End of input: treat a trailing unterminated line and frame as complete.
    pub fn finish_into(&mut self, out: &mut Vec<SseEvent>) {
        let buffer = std::mem::take(&mut self.buffer);
        if let Some(tail) = buffer.get(self.read_offset..).filter(|tail| !tail.is_empty()) {
            self.process_line(tail.strip_suffix('\r').unwrap_or(tail), out);
        }
        self.read_offset = 0;
        self.process_line("", out);
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.has_data {
                out.push(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(&mut self.data_buffer),
                    id: self.last_event_id.clone(),
                    retry: self.retry.take(),
                });
                self.has_data = false;
            } else {
                self.event_type = None;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.data_buffer.push('\n');
                } else {
                    self.has_data = true;
                }
                self.data_buffer.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.last_event_id = Some(value.to_string()),
            "retry" => self.retry = value.trim().parse().ok(),
            _ => {}
        }
    }
}

/// Parse a complete SSE body, including a final frame without a trailing blank line.
#[must_use]
pub fn parse_sse_text(body: &str) -> Vec<SseEvent> {
    let mut parser = SseParser::new();
    let mut out = Vec::new();
    parser.feed_into(body, &mut out);
    parser.finish_into(&mut out);
    out
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

struct SseStreamState<S> {
    stream: Pin<Box<S>>,
    parser: SseParser,
    remainder: Vec<u8>,
    parsed: Vec<SseEvent>,
    pending: PendingEvents,
    finished: bool,
}

impl<S> SseStreamState<S> {
    /// Decode `bytes` as UTF-8, holding back a code point split across chunks.
    fn feed(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.remainder.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.remainder) {
            Ok(text) => {
                self.parser.feed_into(text, &mut self.parsed);
                self.remainder.clear();
                return Ok(());
            }
            Err(err) if err.error_len().is_some() => {
                return Err(StreamError::MalformedEvent(format!(
                    "invalid UTF-8 in SSE body: {err}"
                )));
            }
            Err(err) => err.valid_up_to(),
        };
        if let Ok(text) = std::str::from_utf8(&self.remainder[..valid_up_to]) {
            self.parser.feed_into(text, &mut self.parsed);
        }
        self.remainder.drain(..valid_up_to);
        Ok(())
    }
}

/// Split a byte stream into SSE events.
///
/// Upstream errors surface as [`StreamError::Transport`] and end the stream.
/// A final frame without a trailing blank line is still dispatched.
pub fn sse_event_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<SseEvent, StreamError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseStreamState {
        stream: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    if let Err(err) = state.feed(&bytes) {
                        state.finished = true;
                        return Some((Err(err), state));
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(StreamError::Transport(err.to_string())), state));
                }
                None => {
                    state.finished = true;
                    state.parser.finish_into(&mut state.parsed);
                }
            }
            state.pending.extend_from_vec(&mut state.parsed);
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
