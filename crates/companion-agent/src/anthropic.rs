use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
use crate::stream::StreamEvent;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }

    fn request_builder(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }

    /// Map a non-success HTTP response to a `ProviderError`.
    async fn error_for(resp: reqwest::Response) -> ProviderError {
        let status = resp.status().as_u16();
        if status == 429 {
            // Retry-After arrives in seconds.
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return ProviderError::RateLimited { retry_after_ms };
        }
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, "Anthropic API error");
        ProviderError::Api {
            status,
            message: text,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req, false);
        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self.request_builder(&body).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let body = build_request_body(req, true);
        debug!(model = %req.model, "sending streaming request to Anthropic");

        let resp = self.request_builder(&body).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        crate::anthropic_stream::process_stream(resp, tx).await;
        Ok(())
    }
}

fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": req.messages,
        "stream": stream,
    });

    if let Some(system) = &req.system {
        body["system"] = serde_json::Value::String(system.clone());
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    // Thinking is never combined with streaming — streamed turns disable it.
    if !stream {
        if let Some(budget) = req.thinking_budget.filter(|b| *b > 0) {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }
    }

    body
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    use crate::provider::ToolCall;

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall { id, name, input });
            }
            _ => {}
        }
    }

    ChatResponse {
        content: text_parts.join(""),
        model: resp.model,
        tokens_in: resp.usage.input_tokens,
        tokens_out: resp.usage.output_tokens,
        stop_reason: resp.stop_reason.unwrap_or_default(),
        tool_calls,
    }
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// Extended-thinking block — filtered out; callers never see raw
    /// thinking text via the non-streaming path.
    #[serde(rename = "thinking")]
    #[allow(dead_code)]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_includes_tools_only_when_present() {
        let mut req = ChatRequest::new("claude-sonnet-4-6", 1024);
        req.push_text("user", "hi");
        let body = build_request_body(&req, false);
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], false);

        req.tools.push(crate::provider::ToolDefinition {
            name: "save_memory".to_string(),
            description: "save".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        });
        let body = build_request_body(&req, false);
        assert_eq!(body["tools"][0]["name"], "save_memory");
    }

    #[test]
    fn streaming_disables_thinking() {
        let mut req = ChatRequest::new("claude-sonnet-4-6", 1024);
        req.thinking_budget = Some(2048);
        let streamed = build_request_body(&req, true);
        assert!(streamed.get("thinking").is_none());
        assert_eq!(streamed["stream"], true);

        let plain = build_request_body(&req, false);
        assert_eq!(plain["thinking"]["budget_tokens"], 2048);
    }

    #[test]
    fn response_parse_splits_text_and_tool_calls() {
        let api = ApiResponse {
            model: "m".to_string(),
            content: vec![
                ContentBlock::Text {
                    text: "checking".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "tu_1".to_string(),
                    name: "web_search".to_string(),
                    input: serde_json::json!({"query": "tea"}),
                },
            ],
            stop_reason: Some("tool_use".to_string()),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        };
        let resp = parse_response(api);
        assert_eq!(resp.content, "checking");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "web_search");
        assert_eq!(resp.stop_reason, "tool_use");
    }
}
