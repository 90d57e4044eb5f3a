// Investigation Engine
//
// This crate provides a provider-agnostic implementation of an agentic
// investigation loop (model call → tool execution → repeat) for diagnosing
// infrastructure issues.
//
// Key design decisions:
// - The loop is generic over a Provider trait; vendor adapters (Anthropic,
//   OpenAI) normalize wire formats so the engine never branches on vendor
// - Tools are registered by name in a ToolRegistry; a batch of tool calls
//   from one model turn executes concurrently with ordering preserved
// - Expected failure modes (iteration cap, unparseable final text, a model
//   that goes silent) are structured LoopResults, not errors
// - Provider calls can be guarded by a circuit breaker from
//   opsloop-reliability; an open circuit is the one mid-loop hard error
// - Finished loops emit one LoopRecord to a pluggable MetricsSink; adapters
//   can mirror full request/response traces to a DebugSink
// - Final analysis text is parsed with a brace-depth scanner, never a regex

pub mod debug;
pub mod engine;
pub mod error;
pub mod extract;
pub mod factory;
pub mod metrics;
pub mod provider;
pub mod tools;
pub mod turn;

// Vendor adapters
pub mod providers;

// In-memory implementations for examples and testing
pub mod mock;

// Re-exports for convenience
pub use engine::{
    CompletionReason, LoopConfig, LoopResult, LoopStatus, ToolLoop, DEFAULT_MAX_ITERATIONS,
};
pub use error::{Error, Result};
pub use extract::extract_json_object;
pub use provider::{AssistantReply, Provider, TokenUsage};
pub use turn::{ToolCallRequest, Turn};

// Provider construction re-exports
pub use factory::{create_provider, BoxedProvider, ProviderConfig, ProviderType};
pub use providers::{AnthropicProvider, OpenAiProvider};

// Tool abstraction re-exports
pub use tools::{
    EchoExecutor, FailingExecutor, ToolDefinition, ToolExecutor, ToolOutcome, ToolRegistry,
    ToolRegistryBuilder,
};

// Sink re-exports
pub use debug::{CallTrace, DebugSink, FsDebugSink, NoopDebugSink};
pub use metrics::{
    InMemoryMetricsSink, JsonlMetricsSink, LoopRecord, MetricsSink, NoopMetricsSink, SinkError,
};

// Test doubles
pub use mock::{MockProvider, RecordingExecutor, StaticExecutor};
