// Anthropic provider implementation using direct HTTP API
//
// Messages API, non-streaming: the system prompt rides as the top-level
// `system` field, tool invocations and results travel as `tool_use` /
// `tool_result` content blocks. All tool_result turns answering one
// assistant turn must land in a single user message, so consecutive
// results are coalesced during request building.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use opsloop_reliability::RetryPolicy;

use super::{is_retryable_status, send_with_retry, HttpFault};
use crate::debug::{emit_trace, CallTrace, DebugSink};
use crate::error::{Error, Result};
use crate::factory::ProviderType;
use crate::provider::{AssistantReply, Provider, TokenUsage};
use crate::tools::ToolDefinition;
use crate::turn::{ToolCallRequest, Turn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Vendor default model
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    retry: RetryPolicy,
    debug_sink: Option<Arc<dyn DebugSink>>,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            retry: RetryPolicy::exponential(),
            debug_sink: None,
        }
    }

    /// Create a provider from the `ANTHROPIC_API_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| Error::config("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    /// Create a provider pointed at a custom base URL (gateways, tests)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let mut provider = Self::new(api_key);
        provider.base_url = base_url.into();
        provider
    }

    /// Override the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the per-reply output token cap
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the sampling temperature (vendor default when unset)
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Override the retry policy for transient HTTP faults
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach a debug sink that receives every call trace
    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), MESSAGES_PATH)
    }

    /// Map turns onto Messages API content blocks
    fn build_request(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[ToolDefinition],
    ) -> AnthropicRequest {
        let mut messages: Vec<AnthropicMessage> = Vec::new();

        for turn in history {
            match turn {
                Turn::User { text } => messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: vec![RequestBlock::Text { text: text.clone() }],
                }),
                Turn::Assistant { text, tool_calls } => {
                    let mut content = Vec::new();
                    if !text.is_empty() {
                        content.push(RequestBlock::Text { text: text.clone() });
                    }
                    for call in tool_calls {
                        content.push(RequestBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                    if !content.is_empty() {
                        messages.push(AnthropicMessage {
                            role: "assistant".to_string(),
                            content,
                        });
                    }
                }
                Turn::ToolResult {
                    call_id,
                    tool_name: _,
                    output,
                    error,
                } => {
                    let (content, is_error) = match (error, output) {
                        (Some(message), _) => (message.clone(), true),
                        (None, Some(value)) => (value.to_string(), false),
                        (None, None) => (String::new(), false),
                    };
                    let block = RequestBlock::ToolResult {
                        tool_use_id: call_id.clone(),
                        content,
                        is_error,
                    };
                    // All results answering one assistant turn share one
                    // user message
                    match messages.last_mut() {
                        Some(last) if last.is_tool_results() => last.content.push(block),
                        _ => messages.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: vec![block],
                        }),
                    }
                }
            }
        }

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: system_prompt.to_string(),
            messages,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
        }
    }

    async fn execute_once(
        &self,
        request: &AnthropicRequest,
    ) -> std::result::Result<AnthropicResponse, HttpFault> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| HttpFault::retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("API request failed with status {status}: {body}");
            return Err(if is_retryable_status(status) {
                HttpFault::retryable(message)
            } else {
                HttpFault::fatal(message)
            });
        }

        response
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| HttpFault::fatal(format!("failed to parse response: {e}")))
    }

    fn parse_reply(response: AnthropicResponse) -> AssistantReply {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                ResponseBlock::Text { text: chunk } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&chunk);
                }
                ResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCallRequest::new(id, name, input));
                }
                ResponseBlock::Unknown => {}
            }
        }

        let usage = response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                cache_read_tokens: u.cache_read_input_tokens,
            })
            .unwrap_or_default();

        AssistantReply {
            text,
            tool_calls,
            usage,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn send_message_with_tools(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply> {
        let request = self.build_request(system_prompt, history, tools);
        let response =
            send_with_retry(&self.retry, "anthropic", || self.execute_once(&request)).await?;
        let reply = Self::parse_reply(response);

        if let Some(sink) = &self.debug_sink {
            emit_trace(
                sink,
                CallTrace {
                    provider: self.provider_type().to_string(),
                    model: self.model.clone(),
                    system_prompt: system_prompt.to_string(),
                    history: history.to_vec(),
                    reply_text: reply.text.clone(),
                    tool_calls: reply.tool_calls.clone(),
                    usage: reply.usage,
                    timestamp: Utc::now(),
                },
            )
            .await;
        }

        Ok(reply)
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<RequestBlock>,
}

impl AnthropicMessage {
    fn is_tool_results(&self) -> bool {
        self.role == "user"
            && self
                .content
                .iter()
                .all(|b| matches!(b, RequestBlock::ToolResult { .. }))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use serde_json::json;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("test-key")
    }

    #[test]
    fn test_request_shape_with_tools() {
        let history = vec![Turn::user("why is payments-api down?")];
        let tools = vec![ToolDefinition::new(
            "get_pod_logs",
            "Fetch recent logs for a pod",
            json!({ "type": "object", "properties": { "pod": { "type": "string" } } }),
        )];

        let request = provider().build_request("You investigate clusters.", &history, &tools);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["system"], "You investigate clusters.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(body["tools"][0]["name"], "get_pod_logs");
        assert!(body["tools"][0]["input_schema"].is_object());

        // Temperature stays off the wire unless set
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_temperature_serialized_when_set() {
        let request =
            provider()
                .with_temperature(0.5)
                .build_request("sys", &[Turn::user("hi")], &[]);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn test_tool_results_coalesce_into_one_user_message() {
        let history = vec![
            Turn::user("investigate"),
            Turn::assistant_with_tools(
                "",
                vec![
                    ToolCallRequest::new("c1", "get_pod_logs", json!({ "pod": "a" })),
                    ToolCallRequest::new("c2", "get_pod_events", json!({ "pod": "a" })),
                ],
            ),
            Turn::tool_output("c1", "get_pod_logs", json!({ "lines": 10 })),
            Turn::tool_error("c2", "get_pod_events", "events API timed out"),
        ];

        let request = provider().build_request("sys", &history, &[]);
        let body = serde_json::to_value(&request).unwrap();
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");

        // Both results ride in a single user message
        assert_eq!(messages[2]["role"], "user");
        let results = messages[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "c1");
        assert!(results[0].get("is_error").is_none());
        assert_eq!(results[1]["tool_use_id"], "c2");
        assert_eq!(results[1]["is_error"], true);
        assert_eq!(results[1]["content"], "events API timed out");
    }

    #[test]
    fn test_empty_tools_omitted() {
        let request = provider().build_request("sys", &[Turn::user("hi")], &[]);
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_reply_with_tool_use() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "Checking the pod now." },
                { "type": "tool_use", "id": "toolu_1", "name": "get_pod_logs",
                  "input": { "pod": "payments-api-0" } }
            ],
            "usage": { "input_tokens": 312, "output_tokens": 48, "cache_read_input_tokens": 1024 }
        }))
        .unwrap();

        let reply = AnthropicProvider::parse_reply(response);
        assert_eq!(reply.text, "Checking the pod now.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "get_pod_logs");
        assert_eq!(reply.usage.input_tokens, 312);
        assert_eq!(reply.usage.cache_read_tokens, 1024);
    }

    #[test]
    fn test_parse_reply_tolerates_unknown_blocks() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                { "type": "thinking", "thinking": "hmm" },
                { "type": "text", "text": "done" }
            ]
        }))
        .unwrap();

        let reply = AnthropicProvider::parse_reply(response);
        assert_eq!(reply.text, "done");
        assert!(reply.tool_calls.is_empty());
        assert_eq!(reply.usage, TokenUsage::default());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", AnthropicProvider::new("sk-ant-secret"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("sk-ant-secret"));
    }
}
