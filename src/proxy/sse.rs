//! Line framing for Server-Sent Events.
//!
//! Upstream bytes arrive in arbitrary chunks. `SseLineDecoder` buffers the
//! unterminated tail between chunks so a line (or a multi-byte UTF-8
//! character) split across two reads is decoded once, whole.

/// Longest unterminated line kept between chunks.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("SSE line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Splits a byte stream into SSE lines with `\n` / `\r\n` removed.
#[derive(Debug)]
pub struct SseLineDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no `\n`.
    scanned: usize,
    limit: usize,
}

impl Default for SseLineDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    /// Append a chunk and return every line it completed. Fails once the
    /// unterminated tail grows past the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, LineTooLong> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.limit {
            return Err(LineTooLong { limit: self.limit });
        }
        Ok(lines)
    }

    /// Flush an unterminated final line. An upstream that closes
    /// mid-frame ends the stream normally; whatever was complete is kept.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Some(line)
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// A classified SSE line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseField<'a> {
    /// Record separator.
    Blank,
    /// `: keep-alive` and similar.
    Comment,
    Event(&'a str),
    /// Payload with the `data:` prefix and surrounding whitespace removed.
    Data(&'a str),
    /// `id:`, `retry:` or anything unrecognised.
    Other,
}

pub fn classify(line: &str) -> SseField<'_> {
    if line.trim().is_empty() {
        SseField::Blank
    } else if line.starts_with(':') {
        SseField::Comment
    } else if let Some(rest) = line.strip_prefix("data:") {
        SseField::Data(rest.trim())
    } else if let Some(rest) = line.strip_prefix("event:") {
        SseField::Event(rest.trim())
    } else {
        SseField::Other
    }
}
