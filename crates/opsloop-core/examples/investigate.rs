//! Investigation Demo - Tool Loop with a Scripted Provider
//!
//! Drives a full multi-turn investigation of a crash-looping pod using the
//! scripted MockProvider, so the demo runs offline with no API key. The
//! diagnostic tools return canned cluster evidence; swapping in a real
//! vendor is a one-line change through `create_provider`.
//!
//! Finished loops are appended to `opsloop-metrics.jsonl` in the working
//! directory.
//!
//! Run with: cargo run -p opsloop-core --example investigate

use async_trait::async_trait;
use opsloop_core::{
    AssistantReply, JsonlMetricsSink, LoopConfig, MetricsSink, MockProvider, TokenUsage,
    ToolCallRequest, ToolDefinition, ToolExecutor, ToolLoop, ToolOutcome, ToolRegistry, Turn,
};
use serde_json::{json, Value};
use std::sync::Arc;

// ============================================================================
// Diagnostic Tools (canned evidence)
// ============================================================================

/// Returns the last log lines of a pod
struct GetPodLogs;

#[async_trait]
impl ToolExecutor for GetPodLogs {
    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let pod = arguments
            .get("pod")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        ToolOutcome::success(json!({
            "pod": pod,
            "lines": [
                "INFO  starting checkout-api v2.14.1",
                "INFO  connected to postgres",
                "WARN  heap usage 92% of -Xmx",
                "Killed"
            ]
        }))
    }
}

/// Lists recent events for the namespace
struct GetEvents;

#[async_trait]
impl ToolExecutor for GetEvents {
    async fn execute(&self, _arguments: Value) -> ToolOutcome {
        ToolOutcome::success(json!({
            "events": [
                { "reason": "BackOff", "message": "Back-off restarting failed container", "count": 14 },
                { "reason": "Killing", "message": "Stopping container checkout-api", "count": 14 }
            ]
        }))
    }
}

/// Describes a pod: status, limits, restart counts
struct DescribePod;

#[async_trait]
impl ToolExecutor for DescribePod {
    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let pod = arguments
            .get("pod")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        ToolOutcome::success(json!({
            "pod": pod,
            "phase": "Running",
            "restart_count": 14,
            "last_state": { "terminated": { "reason": "OOMKilled", "exit_code": 137 } },
            "resources": { "limits": { "memory": "256Mi" }, "requests": { "memory": "128Mi" } }
        }))
    }
}

// ============================================================================
// Scripted model replies
// ============================================================================

fn scripted_provider() -> MockProvider {
    let final_text = r#"Evidence gathered. The container is exceeding its memory limit.

{"analysis": "checkout-api pod is OOMKilled: the JVM working set exceeds the 256Mi container memory limit", "findings": ["last state: OOMKilled (exit code 137)", "restart count 14 with repeated BackOff events", "logs show heap usage at 92% of -Xmx before the kill", "memory limit 256Mi, request 128Mi"], "remediation": "raise the memory limit to 512Mi or cap the JVM heap below the limit"}"#;

    MockProvider::new()
        .with_reply(
            AssistantReply::text("Pulling logs and events for the failing pod.")
                .with_tool_calls(vec![
                    ToolCallRequest::new(
                        "call_1",
                        "get_pod_logs",
                        json!({ "pod": "checkout-api-6d9f4c" }),
                    ),
                    ToolCallRequest::new("call_2", "get_events", json!({ "namespace": "shop" })),
                ])
                .with_usage(TokenUsage::new(480, 55)),
        )
        .with_reply(
            AssistantReply::text("The kill pattern looks like OOM. Checking limits.")
                .with_tool_calls(vec![ToolCallRequest::new(
                    "call_3",
                    "describe_pod",
                    json!({ "pod": "checkout-api-6d9f4c" }),
                )])
                .with_usage(TokenUsage::new(720, 40).with_cache_read(430)),
        )
        .with_reply(
            AssistantReply::text(final_text)
                .with_usage(TokenUsage::new(910, 180).with_cache_read(650)),
        )
}

fn diagnostic_registry() -> ToolRegistry {
    ToolRegistry::builder()
        .tool(
            ToolDefinition::new(
                "get_pod_logs",
                "Fetch the most recent log lines from a pod",
                json!({
                    "type": "object",
                    "properties": { "pod": { "type": "string", "description": "Pod name" } },
                    "required": ["pod"]
                }),
            ),
            GetPodLogs,
        )
        .tool(
            ToolDefinition::new(
                "get_events",
                "List recent events in a namespace",
                json!({
                    "type": "object",
                    "properties": { "namespace": { "type": "string" } }
                }),
            ),
            GetEvents,
        )
        .tool(
            ToolDefinition::new(
                "describe_pod",
                "Describe a pod: phase, restart counts, resource limits",
                json!({
                    "type": "object",
                    "properties": { "pod": { "type": "string" } },
                    "required": ["pod"]
                }),
            ),
            DescribePod,
        )
        .build()
}

// ============================================================================
// Transcript printing
// ============================================================================

fn print_transcript(history: &[Turn]) {
    println!("\n  Transcript:");
    for (i, turn) in history.iter().enumerate() {
        match turn {
            Turn::User { text } => {
                println!("    {}. [User] {}", i + 1, text);
            }
            Turn::Assistant { text, tool_calls } => {
                if !tool_calls.is_empty() {
                    println!("    {}. [Assistant] Calling tool(s):", i + 1);
                    for call in tool_calls {
                        println!("       -> {}({})", call.name, call.arguments);
                    }
                    if !text.is_empty() {
                        println!("       Text: {text}");
                    }
                } else {
                    println!("    {}. [Assistant] {}", i + 1, text);
                }
            }
            Turn::ToolResult {
                tool_name,
                output,
                error,
                ..
            } => {
                if let Some(err) = error {
                    println!("    {}. [Tool {}] Error: {}", i + 1, tool_name, err);
                } else if let Some(out) = output {
                    println!("    {}. [Tool {}] {}", i + 1, tool_name, out);
                }
            }
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsloop_core=info".into()),
        )
        .init();

    println!("=== Investigation Demo (opsloop-core) ===");
    println!("(Scripted provider, canned cluster evidence)\n");

    let registry = diagnostic_registry();
    println!("Available tools: {:?}", registry.tool_names());

    let metrics = Arc::new(JsonlMetricsSink::new("opsloop-metrics.jsonl"));

    let engine = ToolLoop::new(
        Arc::new(scripted_provider()),
        Arc::new(registry),
        LoopConfig::new(
            "You are an SRE investigating a Kubernetes incident. Use the available \
             tools to gather evidence, then return a JSON analysis with fields \
             'analysis', 'findings', and 'remediation'.",
        )
        .with_max_iterations(8),
    )
    .with_metrics_sink(metrics.clone());

    let issue = "checkout-api pod keeps restarting, checkout conversion is dropping";
    println!("User: {issue}\n");

    let result = engine.run(issue).await?;

    print_transcript(&result.history);

    println!("\n  Outcome: {} ({})", result.status, result.completion_reason);
    if let Some(analysis) = &result.analysis {
        println!("  Analysis:\n{}", serde_json::to_string_pretty(analysis)?);
    }
    println!(
        "  Iterations: {}, tool calls: {}, tools used: {:?}",
        result.iteration_count, result.tool_call_count, result.unique_tools_used
    );
    println!(
        "  Tokens: {} in / {} out ({} cached, hit rate {:.0}%)",
        result.usage.input_tokens,
        result.usage.output_tokens,
        result.usage.cache_read_tokens,
        result.usage.cache_hit_rate() * 100.0
    );

    metrics.flush().await?;
    println!("\nMetrics appended to opsloop-metrics.jsonl");
    println!("=== Demo completed! ===");
    Ok(())
}
