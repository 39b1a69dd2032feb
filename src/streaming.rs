//! SSE transcoding: Anthropic's typed `event:`/`data:` stream in, an
//! OpenAI-style `data:`-only chunk stream out.
//!
//! Line-buffering plus per-event-type dispatch, generalized to emit a
//! downstream chunk per event instead of only accumulating block state.

use std::time::Duration;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use serde_json::{json, Value};

use crate::models::finish_reason;

/// Byte sequence every streaming session ends with, success or failure.
pub const TERMINAL_SENTINEL: &str = "data: [DONE]\n\n";

/// Accumulates raw bytes into complete lines, tolerant of chunk boundaries
/// landing mid-line.
#[derive(Default)]
struct LineSplitter {
    buffer: String,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
    }

    fn next_line(&mut self) -> Option<String> {
        let idx = self.buffer.find('\n')?;
        let line = self.buffer[..idx].trim_end_matches('\r').to_string();
        self.buffer.drain(..=idx);
        Some(line)
    }
}

/// Per-event-type translation, holding just enough state (the upstream
/// message id and the downstream model name) to stamp every chunk.
struct EventTranslator {
    model: String,
    message_id: String,
}

impl EventTranslator {
    fn new(model: String) -> Self {
        Self {
            model,
            message_id: String::new(),
        }
    }

    /// Translate one upstream event into zero or more downstream chunks.
    fn translate(&mut self, event_type: &str, data: &Value) -> Vec<Value> {
        match event_type {
            "message_start" => {
                self.message_id = data
                    .get("message")
                    .and_then(|m| m.get("id"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("msg_unknown")
                    .to_string();
                vec![self.chunk(json!({"role": "assistant", "content": ""}), None)]
            }
            "content_block_start" => {
                let index = data.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let block = data.get("content_block");
                match block.and_then(|b| b.get("type")).and_then(|v| v.as_str()) {
                    Some("tool_use") => {
                        let id = block
                            .and_then(|b| b.get("id"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        let name = block
                            .and_then(|b| b.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        vec![self.chunk(
                            json!({
                                "tool_calls": [{
                                    "index": index,
                                    "id": id,
                                    "type": "function",
                                    "function": {"name": name, "arguments": ""},
                                }],
                            }),
                            None,
                        )]
                    }
                    _ => vec![],
                }
            }
            "content_block_delta" => {
                let index = data.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let Some(delta) = data.get("delta") else {
                    return vec![];
                };
                match delta.get("type").and_then(|v| v.as_str()) {
                    Some("text_delta") => {
                        let text = delta.get("text").and_then(|v| v.as_str()).unwrap_or("");
                        vec![self.chunk(json!({"content": text}), None)]
                    }
                    Some("input_json_delta") => {
                        let partial = delta
                            .get("partial_json")
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        vec![self.chunk(
                            json!({
                                "tool_calls": [{"index": index, "function": {"arguments": partial}}],
                            }),
                            None,
                        )]
                    }
                    _ => vec![],
                }
            }
            "message_delta" => match data
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str())
            {
                Some(reason) => vec![self.chunk(json!({}), Some(finish_reason(reason)))],
                None => vec![],
            },
            "message_stop" => vec![self.chunk(json!({}), Some("stop"))],
            _ => vec![],
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.message_id,
            "object": "chat.completion.chunk",
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }
}

/// Drives one open streaming session: pairs `event:`/`data:` lines, feeds
/// them through [`EventTranslator`], and renders downstream SSE text.
///
/// Holds no state shared with any other session.
pub struct SseTranscoder {
    splitter: LineSplitter,
    translator: EventTranslator,
    pending_event: Option<String>,
}

impl SseTranscoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            splitter: LineSplitter::default(),
            translator: EventTranslator::new(model.into()),
            pending_event: None,
        }
    }

    /// Feed a chunk of upstream bytes, returning the rendered downstream
    /// SSE text produced from every complete line now available. Malformed
    /// `data:` JSON is skipped silently; the stream continues.
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        self.splitter.push(chunk);
        let mut out = String::new();

        while let Some(line) = self.splitter.next_line() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(event) = line.strip_prefix("event:") {
                self.pending_event = Some(event.trim().to_string());
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if let Some(event_type) = self.pending_event.take() {
                    if let Ok(value) = serde_json::from_str::<Value>(data) {
                        for chunk_json in self.translator.translate(&event_type, &value) {
                            out.push_str("data: ");
                            out.push_str(&chunk_json.to_string());
                            out.push_str("\n\n");
                        }
                    }
                }
            }
        }

        out
    }

    /// Render a single error chunk for an upstream failure observed before
    /// any streaming began.
    pub fn error_chunk(status: u16, body: &str) -> String {
        let value = json!({"error": {"message": body, "type": "upstream_error", "status": status}});
        format!("data: {}\n\n", value)
    }
}

/// Adapt a (possibly-failed) upstream streaming response into a byte
/// stream of downstream SSE text, always ending with [`TERMINAL_SENTINEL`].
///
/// Each upstream chunk is bounded individually by `chunk_timeout` rather
/// than the whole stream being bounded by one deadline, so a long but
/// actively-progressing completion is never cut off mid-stream — only a
/// stall between chunks is.
pub async fn transcode_response(
    response: reqwest::Response,
    model: String,
    chunk_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let lines = vec![
            SseTranscoder::error_chunk(status, &body),
            TERMINAL_SENTINEL.to_string(),
        ];
        return stream::iter(lines.into_iter().map(|l| Ok(Bytes::from(l)))).boxed();
    }

    let transcoder = SseTranscoder::new(model);
    let upstream = response.bytes_stream();

    stream::unfold(
        (upstream, transcoder, false),
        move |(mut upstream, mut transcoder, done)| async move {
            if done {
                return None;
            }
            match tokio::time::timeout(chunk_timeout, upstream.next()).await {
                Ok(Some(Ok(bytes))) => {
                    let rendered = transcoder.feed(&bytes);
                    Some((Ok(Bytes::from(rendered)), (upstream, transcoder, false)))
                }
                Ok(Some(Err(e))) => {
                    let rendered = format!(
                        "{}{}",
                        SseTranscoder::error_chunk(0, &e.to_string()),
                        TERMINAL_SENTINEL
                    );
                    Some((Ok(Bytes::from(rendered)), (upstream, transcoder, true)))
                }
                Ok(None) => Some((
                    Ok(Bytes::from(TERMINAL_SENTINEL)),
                    (upstream, transcoder, true),
                )),
                Err(_elapsed) => {
                    let rendered = format!(
                        "{}{}",
                        SseTranscoder::error_chunk(504, "upstream stalled between chunks"),
                        TERMINAL_SENTINEL
                    );
                    Some((Ok(Bytes::from(rendered)), (upstream, transcoder, true)))
                }
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_start_emits_role_chunk() {
        let mut t = SseTranscoder::new("gpt-4o");
        let out = t.feed(
            b"event: message_start\ndata: {\"message\":{\"id\":\"msg_1\"}}\n\n",
        );
        assert!(out.contains("\"role\":\"assistant\""));
        assert!(out.contains("msg_1"));
    }

    #[test]
    fn text_delta_emits_one_chunk_per_delta_in_order() {
        let mut t = SseTranscoder::new("gpt-4o");
        t.feed(b"event: message_start\ndata: {\"message\":{\"id\":\"msg_1\"}}\n\n");

        let first = t.feed(
            b"event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        );
        let second = t.feed(
            b"event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        );

        assert!(first.contains("\"content\":\"Hel\""));
        assert!(second.contains("\"content\":\"lo\""));
    }

    #[test]
    fn tool_use_start_then_input_json_delta_carry_same_index() {
        let mut t = SseTranscoder::new("gpt-4o");
        let start = t.feed(
            b"event: content_block_start\ndata: {\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"get_weather\"}}\n\n",
        );
        let delta = t.feed(
            b"event: content_block_delta\ndata: {\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"city\\\"\"}}\n\n",
        );

        assert!(start.contains("\"index\":1"));
        assert!(start.contains("get_weather"));
        assert!(delta.contains("\"index\":1"));
        assert!(delta.contains("city"));
    }

    #[test]
    fn message_delta_maps_stop_reason_through_finish_reason_table() {
        let mut t = SseTranscoder::new("gpt-4o");
        let out = t.feed(
            b"event: message_delta\ndata: {\"delta\":{\"stop_reason\":\"max_tokens\"}}\n\n",
        );
        assert!(out.contains("\"finish_reason\":\"length\""));
    }

    #[test]
    fn message_stop_finish_reason_is_stop() {
        let mut t = SseTranscoder::new("gpt-4o");
        let out = t.feed(b"event: message_stop\ndata: {}\n\n");
        assert!(out.contains("\"finish_reason\":\"stop\""));
    }

    #[test]
    fn malformed_data_line_is_skipped_not_fatal() {
        let mut t = SseTranscoder::new("gpt-4o");
        let out = t.feed(b"event: content_block_delta\ndata: not json at all\n\n");
        assert_eq!(out, "");

        let recovered = t.feed(
            b"event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n",
        );
        assert!(recovered.contains("\"content\":\"ok\""));
    }

    #[test]
    fn unrecognized_event_type_is_suppressed() {
        let mut t = SseTranscoder::new("gpt-4o");
        let out = t.feed(b"event: ping\ndata: {}\n\n");
        assert_eq!(out, "");
    }

    #[test]
    fn chunk_arrives_split_across_feed_calls() {
        let mut t = SseTranscoder::new("gpt-4o");
        let first = t.feed(b"event: content_block_delta\ndata: {\"index\":0,\"delta\":");
        let second = t.feed(b"{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n");
        assert_eq!(first, "");
        assert!(second.contains("\"content\":\"hi\""));
    }
}
