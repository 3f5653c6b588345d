//! Line-buffered decoder for `data:`-framed JSON streams.
//!
//! Bytes are buffered until a newline arrives, so a chunk may end anywhere,
//! including inside a multi-byte UTF-8 sequence. The produced event sequence
//! depends only on the concatenated input, never on how it was chunked.

use serde_json::Value;
use tracing::warn;

pub const DONE_TOKEN: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Data(Value),
    Sentinel,
    Malformed(String),
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the events for every line it completed.
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk.as_ref());

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|byte| *byte == b'\n') {
            let line_end = consumed + offset;
            let parsed = parse_line(&String::from_utf8_lossy(&self.buffer[consumed..line_end]));
            consumed = line_end + 1;
            if let Some(event) = parsed {
                let sentinel = event == StreamEvent::Sentinel;
                events.push(event);
                if sentinel {
                    self.finished = true;
                    self.buffer.clear();
                    return events;
                }
            }
        }
        self.buffer.drain(..consumed);
        events
    }

    /// Flushes the unterminated tail at end of stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let tail = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&tail))
            .into_iter()
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Classifies one complete line. Blank lines yield nothing.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    let payload = trimmed
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(trimmed);

    if payload.is_empty() {
        return None;
    }
    // A payload opening with the token ends the stream. The token inside a
    // JSON payload is model text.
    if payload.starts_with(DONE_TOKEN) {
        return Some(StreamEvent::Sentinel);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) if value.is_object() => Some(StreamEvent::Data(value)),
        Ok(_) => {
            warn!(line = %trimmed, "stream line is not a JSON object");
            Some(StreamEvent::Malformed(trimmed.to_owned()))
        }
        Err(error) => {
            warn!(line = %trimmed, error = %error, "failed to parse stream line");
            Some(StreamEvent::Malformed(trimmed.to_owned()))
        }
    }
}
