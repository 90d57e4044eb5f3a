// Conversation model
//
// An investigation conversation is an append-only sequence of turns owned by
// the engine for the duration of one run. Turns are never mutated after being
// appended; the finished history is handed to the caller inside LoopResult.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation requested by the model inside an assistant turn.
///
/// The `id` is unique within a conversation and is answered by exactly one
/// tool-result turn before the next provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    /// Name of a registered tool
    pub name: String,
    /// Free-form arguments; executors validate what they need
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One turn of an investigation conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    /// The issue or question posed by the host
    User { text: String },

    /// Model output: prose, tool-call requests, or both
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },

    /// Outcome of one requested tool call, fed back to the model.
    /// Exactly one of `output` and `error` is set.
    ToolResult {
        call_id: String,
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Turn {
    /// Create a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User { text: text.into() }
    }

    /// Create an assistant turn with no tool calls
    pub fn assistant(text: impl Into<String>) -> Self {
        Turn::Assistant {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Create an assistant turn carrying tool-call requests
    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Turn::Assistant {
            text: text.into(),
            tool_calls,
        }
    }

    /// Create a successful tool-result turn
    pub fn tool_output(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: Value,
    ) -> Self {
        Turn::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: Some(output),
            error: None,
        }
    }

    /// Create a failed tool-result turn
    pub fn tool_error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Turn::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: None,
            error: Some(error.into()),
        }
    }

    /// Whether this is an assistant turn requesting at least one tool call
    pub fn has_tool_calls(&self) -> bool {
        matches!(self, Turn::Assistant { tool_calls, .. } if !tool_calls.is_empty())
    }

    /// Whether this turn is a tool result
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Turn::ToolResult { .. })
    }

    /// Whether this tool result carries an error
    pub fn is_error_result(&self) -> bool {
        matches!(self, Turn::ToolResult { error: Some(_), .. })
    }
}
