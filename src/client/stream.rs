//! Load stream decoding
//!
//! The load response is a text stream of newline-delimited frames, usually in
//! server-sent-event form (`data: {...}`). Chunks can split a frame anywhere,
//! so bytes are buffered until a full line is available.

use crate::client::TabbyError;
use crate::types::progress::ProgressEvent;

/// Longest frame accepted while waiting for its newline
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Incremental frame decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<ProgressEvent>, TabbyError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line[..line.len() - 1])? {
                events.push(event);
            }
        }

        if self.buffer.len() > MAX_FRAME_LEN {
            let len = self.buffer.len();
            self.buffer.clear();
            return Err(TabbyError::StreamParse(format!(
                "frame exceeds {} bytes without a line break ({} buffered)",
                MAX_FRAME_LEN, len
            )));
        }
        Ok(events)
    }

    /// Decode whatever is left once the stream has ended
    pub fn finish(&mut self) -> Result<Option<ProgressEvent>, TabbyError> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }

    /// Bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Decode one line. `Ok(None)` for lines that carry no event.
fn decode_line(raw: &[u8]) -> Result<Option<ProgressEvent>, TabbyError> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| TabbyError::StreamParse(format!("frame is not valid UTF-8: {}", e)))?;
    parse_frame(line)
}

/// Parse a single text frame, stripping SSE framing
pub fn parse_frame(line: &str) -> Result<Option<ProgressEvent>, TabbyError> {
    let line = line.trim();

    // Blank separators and SSE comments
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => {
            if ["event:", "id:", "retry:"].iter().any(|f| line.starts_with(f)) {
                return Ok(None);
            }
            line
        }
    };

    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }

    serde_json::from_str::<ProgressEvent>(payload)
        .map(Some)
        .map_err(|e| TabbyError::StreamParse(format!("{} in frame '{}'", e, truncate(payload, 120))))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
