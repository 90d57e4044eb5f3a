// AI Provider Types
//
// Provider-agnostic types for model interactions. Vendor adapters implement
// the Provider trait; the engine only ever sees these shapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::factory::ProviderType;
use crate::tools::ToolDefinition;
use crate::turn::{ToolCallRequest, Turn};

// ============================================================================
// Provider Trait
// ============================================================================

/// Trait for AI providers
///
/// Implementations handle vendor-specific API calls and response parsing.
/// The multi-turn tool loop is built generically on top of
/// `send_message_with_tools`; adapters do not override orchestration.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Single-turn call without tools
    async fn send_message(&self, system_prompt: &str, history: &[Turn]) -> Result<AssistantReply> {
        self.send_message_with_tools(system_prompt, history, &[]).await
    }

    /// Single-turn call where the model may request tool invocations
    /// instead of (or alongside) text
    async fn send_message_with_tools(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply>;

    /// The vendor's default model identifier
    fn default_model(&self) -> &str;

    /// The model this instance actually sends requests with
    fn model(&self) -> &str {
        self.default_model()
    }

    /// Which vendor this provider talks to
    fn provider_type(&self) -> ProviderType;
}

// ============================================================================
// Reply Types
// ============================================================================

/// Response from a single provider call
#[derive(Debug, Clone, Default)]
pub struct AssistantReply {
    /// Text content; may be empty when the model only requests tools
    pub text: String,
    /// Tool invocations the model asked for this turn
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token accounting for this call
    pub usage: TokenUsage,
}

impl AssistantReply {
    /// Create a text-only reply
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    /// Attach tool call requests
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Attach token usage
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// True when the model produced neither text nor tool calls, the
    /// zero-output anomaly some models exhibit after a tool result
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Token accounting for provider calls.
///
/// `input_tokens` counts uncached prompt tokens; tokens served from the
/// vendor's prompt cache are reported separately in `cache_read_tokens`.
/// Adapters normalize vendor conventions to this split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_read_tokens: 0,
        }
    }

    /// Set the cache-read count
    pub fn with_cache_read(mut self, cache_read_tokens: u64) -> Self {
        self.cache_read_tokens = cache_read_tokens;
        self
    }

    /// Fold another call's usage into this accumulator
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }

    /// Fraction of prompt tokens served from the cache, in `[0.0, 1.0]`.
    /// Returns 0.0 when no prompt tokens were sent at all.
    pub fn cache_hit_rate(&self) -> f64 {
        let prompt_total = self.input_tokens + self.cache_read_tokens;
        if prompt_total == 0 {
            return 0.0;
        }
        self.cache_read_tokens as f64 / prompt_total as f64
    }
}
