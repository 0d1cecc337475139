//! Incremental decoder for the `data:` framing of streamed chat completions.
//!
//! Chat providers send one JSON payload per `data:` line and finish with a
//! literal `[DONE]` payload:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}
//!
//! data: [DONE]
//! ```
//!
//! Every `data:` line is surfaced as its own [`SseFrame`] as soon as the
//! line is complete. Comment lines, `event:`/`id:`/`retry:` fields and blank
//! separators carry nothing the pipeline needs and are skipped.
//!
//! # Examples
//!
//! ```
//! use vibecast::llm::sse::{SseFrame, SseFrameDecoder};
//!
//! let mut decoder = SseFrameDecoder::new();
//! assert!(decoder.push(b"data: hel")?.is_empty());
//! let frames = decoder.push(b"lo\n\ndata: [DONE]\n\n")?;
//! assert_eq!(frames, vec![SseFrame::Data("hello".into()), SseFrame::Done]);
//! # Ok::<(), vibecast::PipelineError>(())
//! ```

use crate::error::{PipelineError, Result};

/// Sentinel payload that ends a stream.
const DONE_SENTINEL: &str = "[DONE]";

/// Longest line held while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 256 * 1024;

/// A complete frame decoded from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A `data:` payload (trimmed), not yet interpreted.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Classify one complete line. Returns `None` for lines that carry no payload.
fn parse_line(line: &str) -> Option<SseFrame> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let (field, value) = line.split_once(':')?;
    if field != "data" {
        return None;
    }
    let payload = value.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(payload.to_owned()))
}

/// Incrementally decode bytes into frames.
///
/// Bytes are buffered until a newline arrives, so a multi-byte UTF-8
/// character split across network reads is decoded intact.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    pending: Vec<u8>,
}

impl SseFrameDecoder {
    /// Create a decoder with an empty line buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every frame completed by it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StreamDecode`] once an unterminated line grows
    /// past [`MAX_LINE_BYTES`]. The decoder should not be used afterwards.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if let Some(frame) = decode_line(&self.pending[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.pending.drain(..start);
        if self.pending.len() > MAX_LINE_BYTES {
            let held = self.pending.len();
            self.pending = Vec::new();
            return Err(PipelineError::StreamDecode(format!(
                "stream line exceeds {MAX_LINE_BYTES} bytes ({held} buffered)"
            )));
        }
        Ok(frames)
    }

    /// Decode whatever remains after the byte stream has ended.
    pub fn flush(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<SseFrame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    parse_line(&line)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn data(s: &str) -> SseFrame {
        SseFrame::Data(s.to_owned())
    }

    // ── parse_line ────────────────────────────────────────────

    #[test]
    fn data_line_with_space() {
        assert_eq!(parse_line("data: hello"), Some(data("hello")));
    }

    #[test]
    fn data_line_without_space() {
        assert_eq!(parse_line("data:hello"), Some(data("hello")));
    }

    #[test]
    fn data_line_keeps_inner_colons() {
        assert_eq!(
            parse_line(r#"data: {"key":"value"}"#),
            Some(data(r#"{"key":"value"}"#))
        );
    }

    #[test]
    fn done_sentinel_with_whitespace() {
        assert_eq!(parse_line("data:  [DONE] "), Some(SseFrame::Done));
    }

    #[test]
    fn non_data_lines_are_skipped() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line("id: 7"), None);
        assert_eq!(parse_line("retry: 5000"), None);
        assert_eq!(parse_line("nodatahere"), None);
        assert_eq!(parse_line("data:"), None);
    }

    // ── SseFrameDecoder ───────────────────────────────────────

    #[test]
    fn whole_body_in_one_chunk() {
        let mut decoder = SseFrameDecoder::new();
        let frames = decoder
            .push(b"data: first\n\ndata: second\n\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(frames, vec![data("first"), data("second"), SseFrame::Done]);
    }

    #[test]
    fn each_data_line_is_its_own_frame() {
        let mut decoder = SseFrameDecoder::new();
        let frames = decoder.push(b"data: a\ndata: b\n\n").unwrap();
        assert_eq!(frames, vec![data("a"), data("b")]);
    }

    #[test]
    fn incremental_split_across_chunks() {
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push(b"data: hel").unwrap().is_empty());
        assert_eq!(decoder.push(b"lo\n\n").unwrap(), vec![data("hello")]);
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn incremental_multiple_frames_in_one_chunk() {
        let mut decoder = SseFrameDecoder::new();
        let frames = decoder.push(b"data: first\n\ndata: sec").unwrap();
        assert_eq!(frames, vec![data("first")]);
        assert_eq!(decoder.push(b"ond\n\n").unwrap(), vec![data("second")]);
    }

    #[test]
    fn incremental_crlf_handling() {
        let mut decoder = SseFrameDecoder::new();
        assert_eq!(
            decoder.push(b"data: hello\r\n\r\n").unwrap(),
            vec![data("hello")]
        );
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let text = "data: caf\u{e9}\n".as_bytes();
        let split = text.len() - 2;
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push(&text[..split]).unwrap().is_empty());
        assert_eq!(
            decoder.push(&text[split..]).unwrap(),
            vec![data("caf\u{e9}")]
        );
    }

    #[test]
    fn unterminated_line_past_limit_is_an_error() {
        let mut decoder = SseFrameDecoder::new();
        let block = vec![b'x'; 64 * 1024];
        let mut result = Ok(Vec::new());
        for _ in 0..16 {
            result = decoder.push(&block);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(PipelineError::StreamDecode(_))));
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn long_line_within_limit_is_decoded() {
        let payload = "y".repeat(MAX_LINE_BYTES - 16);
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push(format!("data: {payload}").as_bytes()).unwrap().is_empty());
        assert_eq!(decoder.push(b"\n").unwrap(), vec![data(&payload)]);
    }

    #[test]
    fn flush_emits_unterminated_line() {
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push(b"data: trailing").unwrap().is_empty());
        assert_eq!(decoder.flush(), Some(data("trailing")));
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn flush_empty() {
        let mut decoder = SseFrameDecoder::new();
        assert_eq!(decoder.flush(), None);
    }
}
