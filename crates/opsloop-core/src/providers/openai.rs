// OpenAI provider implementation using direct HTTP API
//
// Chat Completions, non-streaming. The system prompt becomes the leading
// system message, tools go out as function declarations, and tool-call
// arguments arrive back as JSON strings that get parsed into values.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use opsloop_reliability::RetryPolicy;

use super::{is_retryable_status, send_with_retry, HttpFault};
use crate::debug::{emit_trace, CallTrace, DebugSink};
use crate::error::{Error, Result};
use crate::factory::ProviderType;
use crate::provider::{AssistantReply, Provider, TokenUsage};
use crate::tools::ToolDefinition;
use crate::turn::{ToolCallRequest, Turn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Vendor default model
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    retry: RetryPolicy,
    debug_sink: Option<Arc<dyn DebugSink>>,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
            temperature: None,
            retry: RetryPolicy::exponential(),
            debug_sink: None,
        }
    }

    /// Create a provider from the `OPENAI_API_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::config("OPENAI_API_KEY environment variable not set"))?;
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

    /// Cap the output tokens per reply (vendor default when unset)
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature (vendor default when unset)
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
        format!("{}{}", self.base_url.trim_end_matches('/'), COMPLETIONS_PATH)
    }

    /// Convert a turn to OpenAI's message format
    fn convert_turn(turn: &Turn) -> OpenAiMessage {
        match turn {
            Turn::User { text } => OpenAiMessage {
                role: "user".to_string(),
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            Turn::Assistant { text, tool_calls } => OpenAiMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() {
                    None
                } else {
                    Some(text.clone())
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        tool_calls
                            .iter()
                            .map(|call| OpenAiToolCall {
                                id: call.id.clone(),
                                r#type: "function".to_string(),
                                function: OpenAiFunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
            },
            Turn::ToolResult {
                call_id,
                tool_name: _,
                output,
                error,
            } => {
                let content = match (error, output) {
                    (Some(message), _) => json!({ "error": message }).to_string(),
                    (None, Some(value)) => value.to_string(),
                    (None, None) => String::new(),
                };
                OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(call_id.clone()),
                }
            }
        }
    }

    /// Convert tool definitions to OpenAI's function format
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            })
            .collect()
    }

    fn build_request(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[ToolDefinition],
    ) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(system_prompt.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.extend(history.iter().map(Self::convert_turn));

        OpenAiRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
            tools: if tools.is_empty() {
                None
            } else {
                Some(Self::convert_tools(tools))
            },
        }
    }

    async fn execute_once(
        &self,
        request: &OpenAiRequest,
    ) -> std::result::Result<OpenAiResponse, HttpFault> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            .json::<OpenAiResponse>()
            .await
            .map_err(|e| HttpFault::fatal(format!("failed to parse response: {e}")))
    }

    fn parse_reply(response: OpenAiResponse) -> Result<AssistantReply> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("openai: no choices in response"))?;

        let text = choice.message.content.unwrap_or_default();
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                // Arguments come back as a JSON string
                let arguments =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| json!({}));
                ToolCallRequest::new(tc.id, tc.function.name, arguments)
            })
            .collect();

        let usage = response
            .usage
            .map(|u| {
                let cached = u
                    .prompt_tokens_details
                    .map(|d| d.cached_tokens)
                    .unwrap_or(0);
                // prompt_tokens includes the cached portion; split them apart
                TokenUsage {
                    input_tokens: u.prompt_tokens.saturating_sub(cached),
                    output_tokens: u.completion_tokens,
                    cache_read_tokens: cached,
                }
            })
            .unwrap_or_default();

        Ok(AssistantReply {
            text,
            tool_calls,
            usage,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn send_message_with_tools(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply> {
        let request = self.build_request(system_prompt, history, tools);
        let response =
            send_with_retry(&self.retry, "openai", || self.execute_once(&request)).await?;
        let reply = Self::parse_reply(response)?;

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
        ProviderType::OpenAi
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// OpenAI API types

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Clone, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}
