//! Line-oriented frame buffering shared by the SSE and NDJSON stream
//! decoders. Bytes arrive in arbitrary chunks; decoders consume complete
//! lines one at a time with no look-ahead.

/// Accumulates raw bytes and yields complete lines.
#[derive(Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pop the next complete line, trimmed, or `None` until one arrives.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.find('\n')?;
        let line = self.buffer[..end].trim().to_string();
        self.buffer.drain(..=end);
        Some(line)
    }
}

/// Extract the payload of an SSE `data:` line. Returns `None` for blank
/// lines, comments, and other fields (`event:`, `id:`, ...).
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_pushes() {
        let mut buf = LineBuffer::new();
        buf.push(b"data: {\"a\"");
        assert_eq!(buf.next_line(), None);
        buf.push(b": 1}\ndata: done\n");
        assert_eq!(buf.next_line().as_deref(), Some("data: {\"a\": 1}"));
        assert_eq!(buf.next_line().as_deref(), Some("data: done"));
        assert_eq!(buf.next_line(), None);
    }

    #[test]
    fn crlf_is_trimmed() {
        let mut buf = LineBuffer::new();
        buf.push(b"data: x\r\n");
        assert_eq!(buf.next_line().as_deref(), Some("data: x"));
    }

    #[test]
    fn sse_data_extraction() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data("event: message_stop"), None);
        assert_eq!(sse_data(""), None);
    }
}
