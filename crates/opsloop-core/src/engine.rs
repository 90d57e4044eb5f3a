// Investigation Loop Engine
//
// The state machine driving an autonomous multi-turn investigation: call the
// model with accumulated history, execute whatever tools it requests, feed
// the results back, repeat until it stops asking or the iteration cap hits.
//
// Outcome policy: expected failures of an unreliable autonomous process
// (iteration cap, unparseable final text, a model that goes silent) are
// structured results the host inspects, not errors. Only configuration
// problems and an open circuit breaker surface as Err.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use opsloop_reliability::{CircuitBreaker, CircuitBreakerError};

use crate::error::{Error, Result};
use crate::extract::extract_json_object;
use crate::metrics::{LoopRecord, MetricsSink};
use crate::provider::{AssistantReply, Provider, TokenUsage};
use crate::tools::{ToolDefinition, ToolOutcome, ToolRegistry};
use crate::turn::Turn;

/// Iteration cap applied when the host does not set one
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

// ============================================================================
// Configuration and Result Types
// ============================================================================

/// Configuration for one investigation loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// System prompt framing the investigation
    pub system_prompt: String,
    /// Provider-call budget before the loop gives up
    pub max_iterations: u32,
}

impl LoopConfig {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Overall outcome of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Success,
    Failed,
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopStatus::Success => write!(f, "success"),
            LoopStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Model stopped requesting tools and returned a parseable analysis
    InvestigationComplete,
    /// Iteration cap hit before the model finished
    MaxIterations,
    /// Final text carried no well-formed JSON payload
    ParseFailure,
    /// Model returned zero output after a tool result
    ModelStopped,
    /// Provider failure or fatal tool fault
    Error,
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionReason::InvestigationComplete => "investigation_complete",
            CompletionReason::MaxIterations => "max_iterations",
            CompletionReason::ParseFailure => "parse_failure",
            CompletionReason::ModelStopped => "model_stopped",
            CompletionReason::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Terminal result of one investigation loop
#[derive(Debug, Clone)]
pub struct LoopResult {
    /// Investigation id (time-ordered)
    pub id: Uuid,
    pub status: LoopStatus,
    pub completion_reason: CompletionReason,
    /// Structured analysis extracted from the final text (success only)
    pub analysis: Option<Value>,
    /// Raw final text from the model
    pub final_text: String,
    /// Failure detail when status is Failed
    pub error: Option<String>,
    /// Provider calls made
    pub iteration_count: u32,
    /// Tool invocations across all iterations
    pub tool_call_count: u32,
    /// Distinct tool names invoked, sorted
    pub unique_tools_used: Vec<String>,
    /// Token totals across all provider calls
    pub usage: TokenUsage,
    pub duration: Duration,
    /// Full conversation transcript
    pub history: Vec<Turn>,
}

impl LoopResult {
    pub fn is_success(&self) -> bool {
        self.status == LoopStatus::Success
    }

    /// Fraction of input served from the provider's prompt cache
    pub fn cache_hit_rate(&self) -> f64 {
        self.usage.cache_hit_rate()
    }
}

enum Terminal {
    Complete { analysis: Value, text: String },
    ParseFailure { text: String },
    ModelStopped,
    MaxIterations,
    Error { message: String },
}

// ============================================================================
// ToolLoop
// ============================================================================

/// The multi-turn tool loop.
///
/// Holds a provider, a tool registry, and loop configuration; optional
/// attachments add a circuit breaker around every provider call and a
/// metrics sink that receives one record per finished loop. The host may
/// additionally bound the whole run with `tokio::time::timeout`.
pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    config: LoopConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl ToolLoop {
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>, config: LoopConfig) -> Self {
        Self {
            provider,
            registry,
            config,
            breaker: None,
            metrics: None,
        }
    }

    /// Guard every provider call with a circuit breaker.
    ///
    /// An open circuit propagates as `Error::CircuitOpen` to the host, even
    /// mid-loop; rejected calls are not counted as provider failures.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Emit one LoopRecord per finished loop (best-effort)
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Run one investigation from the user's issue description.
    ///
    /// Returns `Err` only for an open circuit breaker; every other outcome,
    /// including provider failures, lands in the `LoopResult`.
    pub async fn run(&self, user_issue: impl Into<String>) -> Result<LoopResult> {
        let id = Uuid::now_v7();
        let started = Instant::now();
        let definitions = self.registry.definitions();

        let mut history: Vec<Turn> = vec![Turn::user(user_issue)];
        let mut iteration: u32 = 0;
        let mut tool_call_count: u32 = 0;
        let mut tools_used: BTreeSet<String> = BTreeSet::new();
        let mut usage = TokenUsage::default();

        debug!(%id, tools = definitions.len(), "starting investigation");

        let terminal = loop {
            if iteration >= self.config.max_iterations {
                break Terminal::MaxIterations;
            }
            iteration += 1;

            debug!(%id, iteration, "calling provider");
            let reply = match self.call_provider(&history, &definitions).await {
                Ok(reply) => reply,
                Err(err @ Error::CircuitOpen(_)) => return Err(err),
                Err(err) => {
                    break Terminal::Error {
                        message: err.to_string(),
                    }
                }
            };
            usage.accumulate(reply.usage);

            if !reply.has_tool_calls() {
                // Final turn: the model stopped asking for tools
                if reply.is_empty() && history.iter().any(Turn::is_tool_result) {
                    break Terminal::ModelStopped;
                }
                history.push(Turn::assistant(reply.text.clone()));
                break match extract_json_object(&reply.text) {
                    Some(analysis) => Terminal::Complete {
                        analysis,
                        text: reply.text,
                    },
                    None => Terminal::ParseFailure { text: reply.text },
                };
            }

            let calls = reply.tool_calls.clone();
            history.push(Turn::assistant_with_tools(reply.text, reply.tool_calls));

            tool_call_count += calls.len() as u32;
            for call in &calls {
                tools_used.insert(call.name.clone());
            }

            // The whole batch runs concurrently; join_all preserves request
            // order, so results land in history exactly as requested
            debug!(%id, iteration, batch = calls.len(), "executing tool batch");
            let outcomes = join_all(
                calls
                    .iter()
                    .map(|call| self.registry.invoke(&call.name, call.arguments.clone())),
            )
            .await;

            let mut fatal: Option<String> = None;
            for (call, outcome) in calls.iter().zip(outcomes) {
                match &outcome {
                    ToolOutcome::Error(message) => {
                        debug!(%id, tool = %call.name, error = %message, "tool failed, feeding error back to model");
                    }
                    ToolOutcome::Fatal(message) => {
                        error!(%id, tool = %call.name, error = %message, "fatal tool failure, aborting loop");
                        if fatal.is_none() {
                            fatal = Some(format!("tool '{}' failed fatally: {message}", call.name));
                        }
                    }
                    ToolOutcome::Success(_) => {}
                }
                history.push(outcome.into_turn(&call.id, &call.name));
            }
            if let Some(message) = fatal {
                break Terminal::Error { message };
            }
        };

        let (status, completion_reason, analysis, final_text, error) = match terminal {
            Terminal::Complete { analysis, text } => (
                LoopStatus::Success,
                CompletionReason::InvestigationComplete,
                Some(analysis),
                text,
                None,
            ),
            Terminal::ParseFailure { text } => (
                LoopStatus::Failed,
                CompletionReason::ParseFailure,
                None,
                text,
                Some("final text did not contain a well-formed JSON analysis".to_string()),
            ),
            Terminal::ModelStopped => (
                LoopStatus::Failed,
                CompletionReason::ModelStopped,
                None,
                String::new(),
                Some("model returned no output after a tool result".to_string()),
            ),
            Terminal::MaxIterations => (
                LoopStatus::Failed,
                CompletionReason::MaxIterations,
                None,
                String::new(),
                Some(format!(
                    "iteration cap of {} reached before the model finished",
                    self.config.max_iterations
                )),
            ),
            Terminal::Error { message } => (
                LoopStatus::Failed,
                CompletionReason::Error,
                None,
                String::new(),
                Some(message),
            ),
        };

        let result = LoopResult {
            id,
            status,
            completion_reason,
            analysis,
            final_text,
            error,
            iteration_count: iteration,
            tool_call_count,
            unique_tools_used: tools_used.into_iter().collect(),
            usage,
            duration: started.elapsed(),
            history,
        };

        info!(
            id = %result.id,
            status = %result.status,
            reason = %result.completion_reason,
            iterations = result.iteration_count,
            tool_calls = result.tool_call_count,
            input_tokens = result.usage.input_tokens,
            output_tokens = result.usage.output_tokens,
            cache_read_tokens = result.usage.cache_read_tokens,
            duration_ms = result.duration.as_millis() as u64,
            "investigation finished"
        );

        self.emit_record(&result).await;
        Ok(result)
    }

    async fn call_provider(
        &self,
        history: &[Turn],
        definitions: &[ToolDefinition],
    ) -> Result<AssistantReply> {
        let Some(breaker) = &self.breaker else {
            return self
                .provider
                .send_message_with_tools(&self.config.system_prompt, history, definitions)
                .await;
        };

        let outcome = breaker
            .execute(|| {
                self.provider
                    .send_message_with_tools(&self.config.system_prompt, history, definitions)
            })
            .await;

        match outcome {
            Ok(reply) => Ok(reply),
            Err(CircuitBreakerError::Open(open)) => Err(Error::CircuitOpen(open)),
            Err(CircuitBreakerError::Operation(err)) => Err(err),
        }
    }

    async fn emit_record(&self, result: &LoopResult) {
        let Some(sink) = &self.metrics else { return };
        if !sink.is_enabled() {
            return;
        }

        let record = LoopRecord {
            sdk: self.provider.provider_type().to_string(),
            model_version: self.provider.model().to_string(),
            iteration_count: result.iteration_count,
            tool_call_count: result.tool_call_count,
            unique_tools_used: result.unique_tools_used.clone(),
            status: result.status,
            completion_reason: result.completion_reason,
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
            cache_read_tokens: result.usage.cache_read_tokens,
            duration_ms: result.duration.as_millis() as u64,
            timestamp: Utc::now(),
        };

        if let Err(err) = sink.record(record).await {
            warn!(sink = sink.name(), error = %err, "metrics sink failed, continuing");
        }
    }
}
