//! SSE parsing for the Anthropic streaming endpoint.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

/// Accumulation state across SSE events for one response.
#[derive(Default)]
struct StreamState {
    current_event: String,
    /// Block type reported by `content_block_start` ("text" or "tool_use").
    current_block_type: String,
    tool_use_id: String,
    tool_use_name: String,
    tool_use_input_json: String,
    model: String,
    tokens_in: u32,
    tokens_out: u32,
    stop_reason: String,
}

/// Read the byte stream, parse SSE lines, emit [`StreamEvent`]s.
pub async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut state = StreamState::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // Multiple SSE lines per chunk; keep the trailing partial line buffered.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => state.current_event = ev,
                Some(SseParsed::Data(data)) => {
                    if let Some(event) = state.handle_data(&data) {
                        if tx.send(event).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                }
                None => {}
            }
        }

        line_buf = remainder;
    }

    let _ = tx
        .send(StreamEvent::Done {
            model: state.model,
            tokens_in: state.tokens_in,
            tokens_out: state.tokens_out,
            stop_reason: state.stop_reason,
        })
        .await;
}

impl StreamState {
    fn handle_data(&mut self, data: &str) -> Option<StreamEvent> {
        match self.current_event.as_str() {
            "message_start" => {
                if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                    self.model = msg.message.model;
                    self.tokens_in = msg.message.usage.input_tokens;
                }
                None
            }

            "content_block_start" => {
                if let Ok(start) = serde_json::from_str::<ContentBlockStart>(data) {
                    self.current_block_type = start.content_block.block_type.clone();
                    if start.content_block.block_type == "tool_use" {
                        self.tool_use_id = start.content_block.id.unwrap_or_default();
                        self.tool_use_name = start.content_block.name.unwrap_or_default();
                        self.tool_use_input_json.clear();
                    }
                }
                None
            }

            "content_block_delta" => {
                let delta = serde_json::from_str::<ContentBlockDelta>(data).ok()?;
                match delta.delta.delta_type.as_str() {
                    "text_delta" => delta.delta.text.map(|text| {
                        debug!(len = text.len(), "stream text delta");
                        StreamEvent::TextDelta { text }
                    }),
                    "input_json_delta" => {
                        if let Some(partial) = delta.delta.partial_json {
                            self.tool_use_input_json.push_str(&partial);
                        }
                        None
                    }
                    other => {
                        debug!(delta_type = other, "unhandled delta type");
                        None
                    }
                }
            }

            "content_block_stop" => {
                if self.current_block_type == "tool_use" {
                    let input =
                        serde_json::from_str::<serde_json::Value>(&self.tool_use_input_json)
                            .unwrap_or(serde_json::Value::Object(Default::default()));
                    let event = StreamEvent::ToolUse {
                        id: std::mem::take(&mut self.tool_use_id),
                        name: std::mem::take(&mut self.tool_use_name),
                        input,
                    };
                    self.tool_use_input_json.clear();
                    self.current_block_type.clear();
                    return Some(event);
                }
                self.current_block_type.clear();
                None
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                    self.tokens_out = delta.usage.output_tokens;
                    if let Some(reason) = delta.delta.stop_reason {
                        self.stop_reason = reason;
                    }
                }
                None
            }

            "error" => {
                warn!(data, "anthropic stream error");
                Some(StreamEvent::Error {
                    message: data.to_string(),
                })
            }

            // message_stop and unknown events — nothing to do
            _ => None,
        }
    }
}

// Anthropic SSE data types (private — deserialization only)

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_deltas_are_emitted() {
        let mut state = StreamState {
            current_event: "content_block_delta".to_string(),
            ..Default::default()
        };
        let ev = state.handle_data(r#"{"delta":{"type":"text_delta","text":"hi"}}"#);
        assert!(matches!(ev, Some(StreamEvent::TextDelta { text }) if text == "hi"));
    }

    #[test]
    fn tool_use_input_accumulates_across_deltas() {
        let mut state = StreamState::default();

        state.current_event = "content_block_start".to_string();
        state.handle_data(
            r#"{"content_block":{"type":"tool_use","id":"tu_1","name":"web_search"}}"#,
        );

        state.current_event = "content_block_delta".to_string();
        state.handle_data(r#"{"delta":{"type":"input_json_delta","partial_json":"{\"query\":"}}"#);
        state.handle_data(r#"{"delta":{"type":"input_json_delta","partial_json":"\"tea\"}"}}"#);

        state.current_event = "content_block_stop".to_string();
        let ev = state.handle_data("{}");
        match ev {
            Some(StreamEvent::ToolUse { id, name, input }) => {
                assert_eq!(id, "tu_1");
                assert_eq!(name, "web_search");
                assert_eq!(input["query"], "tea");
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn message_delta_captures_stop_reason() {
        let mut state = StreamState {
            current_event: "message_delta".to_string(),
            ..Default::default()
        };
        state.handle_data(r#"{"delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":7}}"#);
        assert_eq!(state.stop_reason, "tool_use");
        assert_eq!(state.tokens_out, 7);
    }
}
