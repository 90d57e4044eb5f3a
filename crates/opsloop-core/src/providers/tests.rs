// HTTP-level tests for the vendor adapters
//
// A wiremock server stands in for each vendor API so tests can pin down the
// exact request shape on the wire and the parsing of canned responses,
// including retry behavior on transient faults.

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use opsloop_reliability::RetryPolicy;

use crate::debug::{CallTrace, DebugSink};
use crate::metrics::SinkError;
use crate::provider::Provider;
use crate::providers::{AnthropicProvider, OpenAiProvider};
use crate::tools::ToolDefinition;
use crate::turn::Turn;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(10), 3)
}

fn log_tool() -> ToolDefinition {
    ToolDefinition::new(
        "get_pod_logs",
        "Fetch recent logs for a pod",
        json!({
            "type": "object",
            "properties": { "pod": { "type": "string" } },
            "required": ["pod"]
        }),
    )
}

// ============================================================================
// Anthropic
// ============================================================================

#[tokio::test]
async fn test_anthropic_request_and_response_mapping() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "You investigate Kubernetes clusters.",
            "tools": [{ "name": "get_pod_logs" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                { "type": "text", "text": "Let me pull the logs." },
                { "type": "tool_use", "id": "toolu_1", "name": "get_pod_logs",
                  "input": { "pod": "payments-api-0" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 250, "output_tokens": 31, "cache_read_input_tokens": 1800 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_base_url("test-key", server.uri());
    let reply = provider
        .send_message_with_tools(
            "You investigate Kubernetes clusters.",
            &[Turn::user("payments-api is crashlooping")],
            &[log_tool()],
        )
        .await
        .unwrap();

    assert_eq!(reply.text, "Let me pull the logs.");
    assert_eq!(reply.tool_calls.len(), 1);
    assert_eq!(reply.tool_calls[0].id, "toolu_1");
    assert_eq!(reply.tool_calls[0].arguments["pod"], "payments-api-0");
    assert_eq!(reply.usage.input_tokens, 250);
    assert_eq!(reply.usage.output_tokens, 31);
    assert_eq!(reply.usage.cache_read_tokens, 1800);
}

#[tokio::test]
async fn test_anthropic_retries_rate_limit_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{ "type": "text", "text": "recovered" }],
            "usage": { "input_tokens": 10, "output_tokens": 2 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_base_url("test-key", server.uri())
        .with_retry_policy(fast_retry());

    let reply = provider
        .send_message("sys", &[Turn::user("hello")])
        .await
        .unwrap();
    assert_eq!(reply.text, "recovered");
}

#[tokio::test]
async fn test_anthropic_client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_base_url("test-key", server.uri())
        .with_retry_policy(fast_retry());

    let err = provider
        .send_message("sys", &[Turn::user("hello")])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn test_anthropic_server_errors_exhaust_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(2)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_base_url("test-key", server.uri())
        .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(10), 2));

    let err = provider
        .send_message("sys", &[Turn::user("hello")])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_anthropic_emits_call_trace() {
    struct CapturingSink {
        traces: Mutex<Vec<CallTrace>>,
    }

    #[async_trait::async_trait]
    impl DebugSink for CapturingSink {
        fn name(&self) -> &'static str {
            "capturing"
        }
        fn is_enabled(&self) -> bool {
            true
        }
        async fn record(&self, trace: CallTrace) -> Result<(), SinkError> {
            self.traces.lock().unwrap().push(trace);
            Ok(())
        }
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{ "type": "text", "text": "all healthy" }],
            "usage": { "input_tokens": 12, "output_tokens": 3 }
        })))
        .mount(&server)
        .await;

    let sink = Arc::new(CapturingSink {
        traces: Mutex::new(Vec::new()),
    });
    let provider = AnthropicProvider::with_base_url("test-key", server.uri())
        .with_debug_sink(sink.clone());

    provider
        .send_message("investigator prompt", &[Turn::user("status?")])
        .await
        .unwrap();

    let traces = sink.traces.lock().unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].provider, "anthropic");
    assert_eq!(traces[0].system_prompt, "investigator prompt");
    assert_eq!(traces[0].reply_text, "all healthy");
    assert_eq!(traces[0].usage.input_tokens, 12);
}

// ============================================================================
// OpenAI
// ============================================================================

#[tokio::test]
async fn test_openai_request_and_response_mapping() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "stream": false,
            "messages": [{ "role": "system", "content": "You investigate Kubernetes clusters." }],
            "tools": [{ "type": "function", "function": { "name": "get_pod_logs" } }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "get_pod_logs",
                            "arguments": "{\"pod\": \"payments-api-0\"}"
                        }
                    }]
                }
            }],
            "usage": {
                "prompt_tokens": 700,
                "completion_tokens": 25,
                "prompt_tokens_details": { "cached_tokens": 500 }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::with_base_url("test-key", server.uri());
    let reply = provider
        .send_message_with_tools(
            "You investigate Kubernetes clusters.",
            &[Turn::user("payments-api is crashlooping")],
            &[log_tool()],
        )
        .await
        .unwrap();

    assert!(reply.text.is_empty());
    assert_eq!(reply.tool_calls[0].name, "get_pod_logs");
    assert_eq!(reply.tool_calls[0].arguments["pod"], "payments-api-0");

    // Cached tokens split out of prompt_tokens
    assert_eq!(reply.usage.input_tokens, 200);
    assert_eq!(reply.usage.cache_read_tokens, 500);
}

#[tokio::test]
async fn test_openai_retries_server_error_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "recovered" }
            }],
            "usage": { "prompt_tokens": 9, "completion_tokens": 2 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::with_base_url("test-key", server.uri())
        .with_retry_policy(fast_retry());

    let reply = provider
        .send_message("sys", &[Turn::user("hello")])
        .await
        .unwrap();
    assert_eq!(reply.text, "recovered");
}

#[tokio::test]
async fn test_openai_tool_result_round_trip_on_wire() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system", "content": "sys" },
                { "role": "user", "content": "go" },
                { "role": "assistant" },
                { "role": "tool", "tool_call_id": "call_1" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "{\"verdict\": \"ok\"}" }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::with_base_url("test-key", server.uri());
    let history = vec![
        Turn::user("go"),
        Turn::assistant_with_tools(
            "",
            vec![crate::turn::ToolCallRequest::new(
                "call_1",
                "list_pods",
                json!({}),
            )],
        ),
        Turn::tool_output("call_1", "list_pods", json!({ "pods": [] })),
    ];

    let reply = provider
        .send_message_with_tools("sys", &history, &[])
        .await
        .unwrap();
    assert_eq!(reply.text, "{\"verdict\": \"ok\"}");
}
