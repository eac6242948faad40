//! Incremental decoder for Server-Sent-Events completion streams.
//!
//! Providers stream `data: {json}` lines separated by blank lines and finish
//! with `data: [DONE]`. Chunks from the network may split lines, and even
//! UTF-8 sequences, at arbitrary points; the parser buffers bytes until a
//! full line is available.

use serde_json::Value;

const DATA_PREFIX: &[u8] = b"data:";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// At the start of a line, waiting for the `data:` field name.
    AwaitingPrefix,
    /// Inside a `data:` line, collecting the payload up to the newline.
    InPayload,
    /// `[DONE]` was received; further input is ignored.
    TerminatorSeen,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    /// Total tokens reported by the provider, usually in the last chunk.
    Usage(u32),
    /// Error object sent by the provider inside the stream.
    Error(String),
    /// A `data:` payload that was not valid JSON.
    Malformed(String),
    Done,
}

#[derive(Debug)]
pub struct SseParser {
    state: ParserState,
    line: Vec<u8>,
    payload: Vec<u8>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingPrefix,
            line: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == ParserState::TerminatorSeen
    }

    /// Consume one network chunk and return the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for &b in chunk {
            match self.state {
                ParserState::TerminatorSeen => break,
                ParserState::AwaitingPrefix => {
                    if b == b'\n' {
                        // comment, `event:`/`id:`/`retry:` field or blank line
                        self.line.clear();
                        continue;
                    }
                    self.line.push(b);
                    if self.line == DATA_PREFIX {
                        self.line.clear();
                        self.state = ParserState::InPayload;
                    }
                }
                ParserState::InPayload => {
                    if b == b'\n' {
                        self.dispatch(&mut events);
                    } else {
                        self.payload.push(b);
                    }
                }
            }
        }
        events
    }

    /// Flush a trailing `data:` line that was never newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.state == ParserState::InPayload && !self.payload.is_empty() {
            self.dispatch(&mut events);
        }
        self.line.clear();
        events
    }

    fn dispatch(&mut self, events: &mut Vec<StreamEvent>) {
        let raw = std::mem::take(&mut self.payload);
        self.state = ParserState::AwaitingPrefix;

        let text = String::from_utf8_lossy(&raw);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if text == DONE_MARKER {
            events.push(StreamEvent::Done);
            self.state = ParserState::TerminatorSeen;
            return;
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                events.push(StreamEvent::Malformed(text.to_string()));
                return;
            }
        };

        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            events.push(StreamEvent::Error(message));
            return;
        }

        let choice = value.get("choices").and_then(|c| c.get(0));
        let content = choice.and_then(|c| {
            c.pointer("/delta/content")
                .or_else(|| c.pointer("/message/content"))
                .and_then(|v| v.as_str())
        });
        if let Some(content) = content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::Delta(content.to_string()));
        }

        if let Some(tokens) = value
            .pointer("/usage/total_tokens")
            .and_then(|t| t.as_u64())
        {
            events.push(StreamEvent::Usage(tokens as u32));
        }
    }
}

/// Decode a complete stream body into its concatenated text.
///
/// Returns the text and whether the `[DONE]` terminator was seen.
pub fn collect_text(body: &[u8]) -> (String, bool) {
    let mut parser = SseParser::new();
    let mut events = parser.feed(body);
    events.extend(parser.finish());
    let text = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Delta(d) => Some(d.as_str()),
            _ => None,
        })
        .collect();
    (text, parser.is_done())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn decodes_deltas_and_terminator() {
        let body = format!("{}{}data: [DONE]\n\n", chunk("Hello"), chunk(" world"));
        let mut parser = SseParser::new();
        let events = parser.feed(body.as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hello".into()),
                StreamEvent::Delta(" world".into()),
                StreamEvent::Done,
            ]
        );
        assert_eq!(parser.state(), ParserState::TerminatorSeen);
    }

    #[test]
    fn survives_arbitrary_chunk_boundaries() {
        let body = format!("{}{}data: [DONE]\n\n", chunk("产品需求"), chunk("文档"));
        let bytes = body.as_bytes();
        for split in 1..bytes.len() {
            let mut parser = SseParser::new();
            let mut events = parser.feed(&bytes[..split]);
            events.extend(parser.feed(&bytes[split..]));
            let text: String = events
                .iter()
                .filter_map(|e| match e {
                    StreamEvent::Delta(d) => Some(d.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(text, "产品需求文档", "split at {split}");
            assert!(parser.is_done());
        }
    }

    #[test]
    fn skips_comments_and_other_fields() {
        let body = format!(": keep-alive\nevent: message\nid: 7\n{}", chunk("x"));
        let mut parser = SseParser::new();
        assert_eq!(parser.feed(body.as_bytes()), vec![StreamEvent::Delta("x".into())]);
    }

    #[test]
    fn reports_malformed_payloads() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {not json\n\n");
        assert_eq!(events, vec![StreamEvent::Malformed("{not json".into())]);
        assert_eq!(parser.state(), ParserState::AwaitingPrefix);
    }

    #[test]
    fn ignores_input_after_done() {
        let body = format!("data: [DONE]\n\n{}", chunk("late"));
        let mut parser = SseParser::new();
        assert_eq!(parser.feed(body.as_bytes()), vec![StreamEvent::Done]);
        assert!(parser.feed(chunk("later").as_bytes()).is_empty());
    }

    #[test]
    fn handles_crlf_and_usage() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}],\"usage\":{\"total_tokens\":12}}\r\n\r\n";
        let mut parser = SseParser::new();
        assert_eq!(
            parser.feed(body.as_bytes()),
            vec![StreamEvent::Delta("a".into()), StreamEvent::Usage(12)]
        );
    }

    #[test]
    fn surfaces_provider_errors() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"error\":{\"message\":\"quota exceeded\"}}\n");
        assert_eq!(events, vec![StreamEvent::Error("quota exceeded".into())]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut parser = SseParser::new();
        let line = chunk("tail");
        assert!(parser.feed(line.trim_end().as_bytes()).is_empty());
        assert_eq!(parser.finish(), vec![StreamEvent::Delta("tail".into())]);
    }

    #[test]
    fn collect_text_reports_completion() {
        let (text, done) = collect_text(format!("{}{}", chunk("a"), chunk("b")).as_bytes());
        assert_eq!(text, "ab");
        assert!(!done);
    }
}
