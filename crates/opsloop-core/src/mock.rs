// Mock Provider and Executors
//
// In-memory test doubles: a provider that replays scripted replies and
// records every call it receives, plus executors with fixed outcomes. The
// engine's test suite is built on these; hosts can also use the canned
// provider as a dry-run mode through the factory.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::factory::ProviderType;
use crate::provider::{AssistantReply, Provider};
use crate::tools::{ToolDefinition, ToolExecutor, ToolOutcome};
use crate::turn::Turn;

// ============================================================================
// MockProvider
// ============================================================================

/// One provider call as the mock saw it
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub history: Vec<Turn>,
    /// Names of the tool definitions offered to the model
    pub tool_names: Vec<String>,
}

#[derive(Debug, Clone)]
enum ScriptedReply {
    Reply(AssistantReply),
    Failure(String),
}

/// Mock provider for testing
///
/// Replays scripted replies in order and records every call. A scripted
/// queue that runs dry is a hard error so a test that makes more calls than
/// it scripted fails loudly; `canned` builds a provider that repeats one
/// fixed reply forever instead.
#[derive(Debug, Default)]
pub struct MockProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<AssistantReply>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockProvider {
    /// Create a mock with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that answers every call with the same text reply
    pub fn canned(text: impl Into<String>) -> Self {
        Self {
            fallback: Some(AssistantReply::text(text)),
            ..Self::default()
        }
    }

    /// Queue a reply (builder form)
    pub fn with_reply(self, reply: AssistantReply) -> Self {
        self.add_reply(reply);
        self
    }

    /// Queue a provider failure (builder form)
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.add_failure(message);
        self
    }

    /// Queue a reply
    pub fn add_reply(&self, reply: AssistantReply) {
        self.replies_lock().push_back(ScriptedReply::Reply(reply));
    }

    /// Queue a provider failure
    pub fn add_failure(&self, message: impl Into<String>) {
        self.replies_lock()
            .push_back(ScriptedReply::Failure(message.into()));
    }

    /// Get the call log
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls_lock().clone()
    }

    /// Number of calls received so far
    pub fn call_count(&self) -> usize {
        self.calls_lock().len()
    }

    /// Clear the script and the call log
    pub fn reset(&self) {
        self.replies_lock().clear();
        self.calls_lock().clear();
    }

    fn replies_lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptedReply>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn calls_lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn send_message_with_tools(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply> {
        self.calls_lock().push(RecordedCall {
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        let scripted = self.replies_lock().pop_front();
        match scripted {
            Some(ScriptedReply::Reply(reply)) => Ok(reply),
            Some(ScriptedReply::Failure(message)) => Err(Error::provider(message)),
            None => match &self.fallback {
                Some(reply) => Ok(reply.clone()),
                None => Err(Error::provider(format!(
                    "mock provider script exhausted after {} calls",
                    self.call_count()
                ))),
            },
        }
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Mock
    }
}

// ============================================================================
// Executors with fixed outcomes
// ============================================================================

/// Returns a fixed outcome, optionally after a delay
pub struct StaticExecutor {
    outcome: ToolOutcome,
    delay: Option<Duration>,
}

impl StaticExecutor {
    pub fn new(outcome: ToolOutcome) -> Self {
        Self {
            outcome,
            delay: None,
        }
    }

    /// Succeed with a fixed payload
    pub fn returning(value: Value) -> Self {
        Self::new(ToolOutcome::Success(value))
    }

    /// Sleep before answering (for ordering and timeout tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ToolExecutor for StaticExecutor {
    async fn execute(&self, _arguments: Value) -> ToolOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

/// Like StaticExecutor but logs every argument payload it receives
pub struct RecordingExecutor {
    calls: Mutex<Vec<Value>>,
    outcome: ToolOutcome,
    delay: Option<Duration>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::returning(serde_json::json!({ "ok": true }))
    }

    /// Succeed with a fixed payload
    pub fn returning(value: Value) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            outcome: ToolOutcome::Success(value),
            delay: None,
        }
    }

    /// Answer with an arbitrary outcome
    pub fn with_outcome(mut self, outcome: ToolOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the argument log
    pub fn calls(&self) -> Vec<Value> {
        self.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Value>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, arguments: Value) -> ToolOutcome {
        self.lock().push(arguments);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}
