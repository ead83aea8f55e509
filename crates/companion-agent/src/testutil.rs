//! Scripted LLM provider for tests: each call consumes the next step.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};
use crate::stream::StreamEvent;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Plain text response, stop_reason `end_turn`.
    Text(String),
    /// Tool-use response: optional preamble text plus tool calls.
    ToolUse {
        text: String,
        calls: Vec<ToolCall>,
    },
    /// 429 with optional Retry-After (ms).
    RateLimited(Option<u64>),
    /// Arbitrary API error status.
    ApiError(u16, String),
    /// Streaming: emit each delta, then Done with the given stop_reason.
    StreamDeltas {
        deltas: Vec<String>,
        stop_reason: String,
    },
    /// Streaming: emit deltas, then an Error event mid-stream.
    StreamErrorAfter {
        deltas: Vec<String>,
        message: String,
    },
    /// Streaming: fail before the first byte.
    StreamFail(u16),
    /// Never resolves — keeps the caller in flight until cancelled.
    Hang,
}

impl ScriptStep {
    pub fn tool_call(name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("tu_{name}"),
            name: name.to_string(),
            input,
        }
    }
}

pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    repeat: Option<ScriptStep>,
    call_count: AtomicUsize,
    pub last_request: Mutex<Option<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            repeat: None,
            call_count: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Every call produces the same step.
    pub fn always(step: ScriptStep) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            repeat: Some(step),
            call_count: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            content: text.to_string(),
            model: "scripted".to_string(),
            tokens_in: 1,
            tokens_out: 1,
            stop_reason: "end_turn".to_string(),
            tool_calls: Vec::new(),
        }
    }

    fn next_step(&self) -> ScriptStep {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .expect("scripted provider ran out of steps")
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req.clone());

        match self.next_step() {
            ScriptStep::Text(text) => Ok(Self::text_response(&text)),
            ScriptStep::ToolUse { text, calls } => Ok(ChatResponse {
                content: text,
                model: "scripted".to_string(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "tool_use".to_string(),
                tool_calls: calls,
            }),
            ScriptStep::RateLimited(retry_after_ms) => {
                Err(ProviderError::RateLimited { retry_after_ms })
            }
            ScriptStep::ApiError(status, message) => Err(ProviderError::Api { status, message }),
            ScriptStep::Hang => std::future::pending().await,
            other => panic!("streaming step {other:?} used in non-streaming send"),
        }
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req.clone());

        match self.next_step() {
            ScriptStep::StreamDeltas {
                deltas,
                stop_reason,
            } => {
                for delta in deltas {
                    let _ = tx.send(StreamEvent::TextDelta { text: delta }).await;
                }
                let _ = tx
                    .send(StreamEvent::Done {
                        model: "scripted".to_string(),
                        tokens_in: 1,
                        tokens_out: 1,
                        stop_reason,
                    })
                    .await;
                Ok(())
            }
            ScriptStep::StreamErrorAfter { deltas, message } => {
                for delta in deltas {
                    let _ = tx.send(StreamEvent::TextDelta { text: delta }).await;
                }
                let _ = tx.send(StreamEvent::Error { message }).await;
                Ok(())
            }
            ScriptStep::StreamFail(status) => Err(ProviderError::Api {
                status,
                message: "stream refused".to_string(),
            }),
            ScriptStep::Text(text) => {
                let _ = tx.send(StreamEvent::TextDelta { text: text.clone() }).await;
                let _ = tx
                    .send(StreamEvent::Done {
                        model: "scripted".to_string(),
                        tokens_in: 1,
                        tokens_out: 1,
                        stop_reason: "end_turn".to_string(),
                    })
                    .await;
                Ok(())
            }
            other => panic!("non-streaming step {other:?} used in send_stream"),
        }
    }
}
