use serde_json::Value;

/// Lines starting with this are comments or keep-alives and carry no data
const COMMENT_SENTINEL: char = ':';
const DONE_MARKER: &str = "[DONE]";

/// Longest line kept while waiting for its newline
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Splits raw upstream bytes into complete lines.
///
/// Bytes are buffered until a newline arrives, so neither line boundaries nor UTF-8
/// code point boundaries need to line up with network chunks. A newline byte never
/// occurs inside a multi-byte UTF-8 sequence, which makes splitting on raw bytes safe.
/// A line that outgrows the limit is dropped up to its newline.
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed one chunk and return every line it completed, empty and comment lines removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if self.discarding {
                self.discarding = false;
            } else if end - start > self.max_line {
                tracing::warn!("Dropping upstream line of {} bytes", end - start);
            } else if let Some(line) = decode_line(&self.pending[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.max_line {
            if !self.discarding {
                tracing::warn!(
                    "Upstream line exceeds {} bytes without a newline, dropping it",
                    self.max_line
                );
            }
            self.pending.clear();
            self.discarding = true;
        }
        lines
    }

    /// Flush a trailing line that was never newline terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        decode_line(&rest)
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let line = match std::str::from_utf8(bytes) {
        Ok(line) => line.to_string(),
        Err(e) => {
            tracing::warn!("Upstream line is not valid UTF-8, decoding lossily: {}", e);
            String::from_utf8_lossy(bytes).into_owned()
        }
    };
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with(COMMENT_SENTINEL) {
        return None;
    }
    Some(line.to_string())
}

/// Turn one framed line into a JSON record.
///
/// Accepts both bare NDJSON and SSE `data:` lines. Other SSE fields and the `[DONE]`
/// marker yield nothing; malformed JSON is logged and skipped.
pub fn parse_record(line: &str) -> Option<Value> {
    let payload = match line.split_once(':') {
        Some(("data", rest)) => rest.trim(),
        Some(("event" | "id" | "retry", _)) => return None,
        _ => line.trim(),
    };
    if payload.is_empty() || payload == DONE_MARKER {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Skipping malformed upstream line: {} ({})", truncate(payload), e);
            None
        }
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(120) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
