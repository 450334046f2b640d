//! Incremental parser for OpenAI-style chat completion event streams.
//!
//! Upstream chunks arrive at arbitrary byte boundaries, so a record can be split across
//! two reads (even in the middle of a multi-byte character). The accumulator keeps the
//! trailing partial line and only interprets complete lines.

use async_openai::types::chat::{CreateChatCompletionStreamResponse, FinishReason};

/// Sentinel payload that terminates the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Reconstructs the generated text from a chat completion event stream.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    pending: Vec<u8>,
    text: String,
    fragments: usize,
    malformed: usize,
    done: bool,
    finished_cleanly: bool,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of raw bytes as received from upstream.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(&self.pending[consumed..end]).into_owned();
            self.process_line(&line);
            consumed = end + 1;
        }
        self.pending.drain(..consumed);
    }

    /// Process whatever is left after the upstream closed the stream.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.process_line(&line);
        }
    }

    fn process_line(&mut self, line: &str) {
        let line = line.trim_end_matches('\r');
        // Handle both "data: value" and "data:value" formats; comments and other fields are ignored
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data).trim();
        if data.is_empty() {
            return;
        }

        if data == DONE_SENTINEL {
            self.done = true;
            return;
        }

        match serde_json::from_str::<CreateChatCompletionStreamResponse>(data) {
            Ok(chunk) => {
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content
                        && !content.is_empty()
                    {
                        self.text.push_str(&content);
                        self.fragments += 1;
                    }
                    if matches!(choice.finish_reason, Some(FinishReason::Stop)) {
                        self.finished_cleanly = true;
                    }
                }
            }
            Err(e) => {
                self.malformed += 1;
                tracing::debug!(error = %e, "Skipping malformed stream record");
            }
        }
    }

    /// Concatenation of every content fragment seen so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Number of content fragments appended
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Records that are not valid chat completion chunks
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Whether the `[DONE]` sentinel was received
    pub fn saw_done(&self) -> bool {
        self.done
    }

    /// Whether the sentinel or a `stop` finish reason marked the generation as complete
    pub fn is_complete(&self) -> bool {
        self.done || self.finished_cleanly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sse_record, stream_chunk};
    use serde_json::json;

    fn finish(reason: &str) -> String {
        stream_chunk(json!({}), Some(reason))
    }

    fn stream_body(fragments: &[&str]) -> String {
        let mut body: String = fragments.iter().map(|f| sse_record(f)).collect();
        body.push_str(&finish("stop"));
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn test_accumulates_fragments_in_order() {
        let mut acc = SseAccumulator::new();
        acc.feed(stream_body(&["<!DOCTYPE html>", "\n<html>", "</html>"]).as_bytes());
        acc.finish();

        assert_eq!(acc.text(), "<!DOCTYPE html>\n<html></html>");
        assert_eq!(acc.fragments(), 3);
        assert!(acc.saw_done());
        assert!(acc.is_complete());
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_result() {
        let body = stream_body(&["<div class=\"p-4\">", "Héllo wörld ✓", "</div>"]);
        let bytes = body.as_bytes();

        let mut whole = SseAccumulator::new();
        whole.feed(bytes);
        whole.finish();

        for chunk_size in [1, 2, 3, 7, 16, 33] {
            let mut acc = SseAccumulator::new();
            for chunk in bytes.chunks(chunk_size) {
                acc.feed(chunk);
            }
            acc.finish();
            assert_eq!(acc.text(), whole.text(), "chunk size {chunk_size}");
            assert!(acc.is_complete());
        }
    }

    #[test]
    fn test_record_split_inside_json() {
        let record = sse_record("abc");
        let (head, tail) = record.split_at(record.find("\"con").unwrap() + 4);

        let mut acc = SseAccumulator::new();
        acc.feed(head.as_bytes());
        assert_eq!(acc.text(), "");
        acc.feed(tail.as_bytes());
        assert_eq!(acc.text(), "abc");
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let mut acc = SseAccumulator::new();
        acc.feed(sse_record("one").as_bytes());
        acc.feed(b"data: {not json}\n\n");
        // valid JSON, but not a chunk
        acc.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"lost\"}}]}\n\n");
        acc.feed(sse_record("two").as_bytes());
        acc.feed(b"data: [DONE]\n\n");
        acc.finish();

        assert_eq!(acc.text(), "onetwo");
        assert_eq!(acc.malformed(), 2);
        assert!(acc.is_complete());
    }

    #[test]
    fn test_comments_and_crlf() {
        let record = sse_record("x").replace("data: ", "data:").replace('\n', "\r\n");

        let mut acc = SseAccumulator::new();
        acc.feed(b": keep-alive\r\n\r\n");
        acc.feed(record.as_bytes());
        acc.finish();

        assert_eq!(acc.text(), "x");
        assert_eq!(acc.malformed(), 0);
    }

    #[test]
    fn test_role_only_delta_adds_nothing() {
        let mut acc = SseAccumulator::new();
        acc.feed(stream_chunk(json!({"role": "assistant", "content": ""}), None).as_bytes());
        acc.feed(sse_record("a").as_bytes());
        acc.finish();

        assert_eq!(acc.text(), "a");
        assert_eq!(acc.fragments(), 1);
    }

    #[test]
    fn test_truncated_stream_is_incomplete() {
        let mut acc = SseAccumulator::new();
        acc.feed(sse_record("partial").as_bytes());
        acc.finish();

        assert_eq!(acc.text(), "partial");
        assert!(!acc.is_complete());
    }

    #[test]
    fn test_trailing_record_without_newline() {
        let mut acc = SseAccumulator::new();
        acc.feed(sse_record("a").as_bytes());
        acc.feed(b"data: [DONE]");
        assert!(!acc.saw_done());
        acc.finish();
        assert!(acc.saw_done());
    }

    #[test]
    fn test_stop_finish_reason_counts_as_complete() {
        let mut acc = SseAccumulator::new();
        acc.feed(sse_record("a").as_bytes());
        acc.feed(finish("stop").as_bytes());
        acc.finish();

        assert!(!acc.saw_done());
        assert!(acc.is_complete());
    }

    #[test]
    fn test_length_finish_reason_is_not_complete() {
        let mut acc = SseAccumulator::new();
        acc.feed(sse_record("a").as_bytes());
        acc.feed(finish("length").as_bytes());
        acc.finish();

        assert!(!acc.is_complete());
    }
}
