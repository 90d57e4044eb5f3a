// Tool Registry for the Investigation Loop
//
// Maps tool names to executors and normalizes every outcome into something
// the loop can feed back to the model. Concrete tools are supplied by the
// host; the engine treats them as opaque.
//
// Design decisions:
// - Definitions (name, description, input_schema) and executors are
//   registered together but kept as plain data + trait object
// - An unknown tool name is an error outcome fed back to the model, never a
//   crash of the loop
// - Arguments are passed through untouched; executors own schema validation
// - A Fatal outcome marks an unrecoverable local fault (missing binary,
//   broken mount) and fails the whole loop instead of being retried
//   iteration after iteration

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::turn::Turn;

// ============================================================================
// Tool Definition
// ============================================================================

/// Description of a tool as presented to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name the model uses to invoke the tool
    pub name: String,
    /// What the tool does; the model reads this to decide when to call it
    pub description: String,
    /// JSON Schema for the arguments
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

// ============================================================================
// Tool Outcome - Error Handling Contract
// ============================================================================

/// Result of one tool invocation.
///
/// - `Success`: payload returned to the model
/// - `Error`: tool-level failure the model should see and adapt to
///   (bad arguments, resource not found, command exited non-zero)
/// - `Fatal`: local infrastructure fault that no amount of model adaptation
///   can fix; the engine fails the whole loop fast instead of burning
///   iterations against it
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Successful execution with a JSON payload
    Success(Value),

    /// Failure the model is told about and may work around
    Error(String),

    /// Unrecoverable fault; aborts the investigation
    Fatal(String),
}

impl ToolOutcome {
    /// Create a successful outcome
    pub fn success(value: impl Into<Value>) -> Self {
        ToolOutcome::Success(value.into())
    }

    /// Create a tool-level error outcome
    pub fn error(message: impl Into<String>) -> Self {
        ToolOutcome::Error(message.into())
    }

    /// Create a fatal outcome
    pub fn fatal(message: impl Into<String>) -> Self {
        ToolOutcome::Fatal(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    /// The fatal message, if this outcome aborts the loop
    pub fn fatal_message(&self) -> Option<&str> {
        match self {
            ToolOutcome::Fatal(msg) => Some(msg),
            _ => None,
        }
    }

    /// Package this outcome as a tool-result turn answering `call_id`.
    ///
    /// Errors land in the turn's `error` field so the model sees a marked
    /// failure it can react to; the loop continues either way.
    pub fn into_turn(self, call_id: &str, tool_name: &str) -> Turn {
        match self {
            ToolOutcome::Success(value) => Turn::tool_output(call_id, tool_name, value),
            ToolOutcome::Error(message) => Turn::tool_error(call_id, tool_name, message),
            ToolOutcome::Fatal(message) => Turn::tool_error(call_id, tool_name, message),
        }
    }
}

// ============================================================================
// Tool Executor Trait
// ============================================================================

/// An executable tool body, supplied by the host.
///
/// Executors may shell out, call HTTP APIs, or anything else; the engine only
/// sees the outcome. Argument validation against the definition's
/// `input_schema` is the executor's job.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use opsloop_core::tools::{ToolExecutor, ToolOutcome};
/// use serde_json::{json, Value};
///
/// struct GetPodLogs;
///
/// #[async_trait]
/// impl ToolExecutor for GetPodLogs {
///     async fn execute(&self, arguments: Value) -> ToolOutcome {
///         let Some(pod) = arguments.get("pod").and_then(|v| v.as_str()) else {
///             return ToolOutcome::error("missing required argument 'pod'");
///         };
///         ToolOutcome::success(json!({ "pod": pod, "logs": "..." }))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: Value) -> ToolOutcome;
}

// ============================================================================
// ToolRegistry
// ============================================================================

struct RegisteredTool {
    definition: ToolDefinition,
    executor: Arc<dyn ToolExecutor>,
}

/// Name → executor lookup with a uniform invocation wrapper.
///
/// # Example
///
/// ```
/// use opsloop_core::tools::{EchoExecutor, ToolDefinition, ToolRegistry};
/// use serde_json::json;
///
/// let registry = ToolRegistry::builder()
///     .tool(
///         ToolDefinition::new("echo", "Echo the message back", json!({"type": "object"})),
///         EchoExecutor,
///     )
///     .build();
///
/// assert!(registry.has("echo"));
/// ```
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, definition: ToolDefinition, executor: impl ToolExecutor + 'static) {
        self.register_arc(definition, Arc::new(executor));
    }

    /// Register an Arc-wrapped executor
    pub fn register_arc(&mut self, definition: ToolDefinition, executor: Arc<dyn ToolExecutor>) {
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                executor,
            },
        );
    }

    /// Invoke a tool by name.
    ///
    /// An unregistered name yields an error outcome that is fed back to the
    /// model like any other tool failure.
    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolOutcome {
        let Some(entry) = self.tools.get(name) else {
            warn!(tool = %name, "model requested unregistered tool");
            return ToolOutcome::error(format!("no tool registered with name '{name}'"));
        };
        entry.executor.execute(arguments).await
    }

    /// Check if a tool is registered
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Definitions for the provider call, sorted by name for a stable payload
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Remove a tool, returning its definition if it existed
    pub fn unregister(&mut self, name: &str) -> Option<ToolDefinition> {
        self.tools.remove(name).map(|t| t.definition)
    }

    /// Create a builder for fluent registration
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

/// Builder for creating a ToolRegistry with a fluent API
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::new(),
        }
    }

    /// Add a tool to the registry
    pub fn tool(mut self, definition: ToolDefinition, executor: impl ToolExecutor + 'static) -> Self {
        self.registry.register(definition, executor);
        self
    }

    /// Add a tool with an Arc-wrapped executor
    pub fn tool_arc(mut self, definition: ToolDefinition, executor: Arc<dyn ToolExecutor>) -> Self {
        self.registry.register_arc(definition, executor);
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Bundled Executors
// ============================================================================

/// Echoes its arguments back (useful for testing)
pub struct EchoExecutor;

#[async_trait]
impl ToolExecutor for EchoExecutor {
    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let message = arguments
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        ToolOutcome::success(serde_json::json!({
            "echoed": message,
            "length": message.len()
        }))
    }
}

/// Always fails (useful for testing error handling)
pub struct FailingExecutor {
    message: String,
    fatal: bool,
}

impl FailingExecutor {
    /// Fail with a tool-level error the model gets to see
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// Fail with a fatal fault that aborts the loop
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

impl Default for FailingExecutor {
    fn default() -> Self {
        Self::error("tool execution failed")
    }
}

#[async_trait]
impl ToolExecutor for FailingExecutor {
    async fn execute(&self, _arguments: Value) -> ToolOutcome {
        if self.fatal {
            ToolOutcome::fatal(&self.message)
        } else {
            ToolOutcome::error(&self.message)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_definition() -> ToolDefinition {
        ToolDefinition::new(
            "echo",
            "Echo back the provided message",
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }),
        )
    }

    #[tokio::test]
    async fn test_echo_executor() {
        let outcome = EchoExecutor
            .execute(json!({ "message": "Hello, world!" }))
            .await;

        match outcome {
            ToolOutcome::Success(value) => {
                assert_eq!(value["echoed"], "Hello, world!");
                assert_eq!(value["length"], 13);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_executor_error() {
        let outcome = FailingExecutor::error("something went wrong")
            .execute(json!({}))
            .await;
        assert_eq!(outcome, ToolOutcome::Error("something went wrong".into()));
    }

    #[tokio::test]
    async fn test_failing_executor_fatal() {
        let outcome = FailingExecutor::fatal("kubectl binary not found")
            .execute(json!({}))
            .await;
        assert_eq!(outcome.fatal_message(), Some("kubectl binary not found"));
    }

    #[tokio::test]
    async fn test_registry_invoke() {
        let registry = ToolRegistry::builder()
            .tool(echo_definition(), EchoExecutor)
            .build();

        let outcome = registry.invoke("echo", json!({ "message": "hi" })).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_registry_unknown_tool_is_error_outcome() {
        let registry = ToolRegistry::new();

        let outcome = registry.invoke("does_not_exist", json!({})).await;
        match outcome {
            ToolOutcome::Error(msg) => assert!(msg.contains("does_not_exist")),
            other => panic!("expected error outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registry_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_definition(), FailingExecutor::error("old"));
        registry.register(echo_definition(), EchoExecutor);

        assert_eq!(registry.len(), 1);
        let outcome = registry.invoke("echo", json!({ "message": "x" })).await;
        assert!(outcome.is_success());
    }

    #[test]
    fn test_definitions_sorted_by_name() {
        let registry = ToolRegistry::builder()
            .tool(
                ToolDefinition::new("zzz", "last", json!({})),
                EchoExecutor,
            )
            .tool(
                ToolDefinition::new("aaa", "first", json!({})),
                EchoExecutor,
            )
            .build();

        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["aaa", "zzz"]);
        assert_eq!(registry.tool_names(), vec!["aaa", "zzz"]);
    }

    #[test]
    fn test_unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_definition(), EchoExecutor);

        let removed = registry.unregister("echo").unwrap();
        assert_eq!(removed.name, "echo");
        assert!(registry.is_empty());
        assert!(registry.unregister("echo").is_none());
    }

    #[test]
    fn test_outcome_into_turn() {
        let turn = ToolOutcome::success(json!({ "ok": true })).into_turn("c1", "echo");
        match turn {
            Turn::ToolResult { output, error, .. } => {
                assert_eq!(output.unwrap()["ok"], true);
                assert!(error.is_none());
            }
            other => panic!("expected tool result, got {other:?}"),
        }

        let turn = ToolOutcome::error("boom").into_turn("c2", "echo");
        assert!(turn.is_error_result());
    }
}
