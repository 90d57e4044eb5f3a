// Debug Sink
//
// Full prompt/response capture for provider calls. Adapters hand every
// completed call to an injected sink so operators can inspect exactly what
// the model saw and answered, with token and cache numbers attached.
//
// Recording is strictly off the critical path: a failing sink is logged and
// ignored, it can never fail or block the provider call itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::metrics::SinkError;
use crate::provider::TokenUsage;
use crate::turn::{ToolCallRequest, Turn};

/// Everything one provider call saw and returned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTrace {
    /// Provider identifier, e.g. "anthropic"
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    /// Conversation history as sent
    pub history: Vec<Turn>,
    /// Text the model returned (may be empty)
    pub reply_text: String,
    /// Tool calls the model requested
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
    pub timestamp: DateTime<Utc>,
}

/// Trait for debug sinks
#[async_trait]
pub trait DebugSink: Send + Sync {
    /// Name of this sink (for logging)
    fn name(&self) -> &'static str;

    /// Check if the sink is enabled/configured
    fn is_enabled(&self) -> bool;

    /// Record one call trace
    async fn record(&self, trace: CallTrace) -> Result<(), SinkError>;
}

/// Record a trace, swallowing sink failures.
pub(crate) async fn emit_trace(sink: &Arc<dyn DebugSink>, trace: CallTrace) {
    if !sink.is_enabled() {
        return;
    }
    if let Err(error) = sink.record(trace).await {
        warn!(sink = sink.name(), %error, "debug sink failed, continuing");
    }
}

/// Writes one pretty-printed JSON file per call under a directory.
///
/// Filenames embed a UUIDv7, so a directory listing is already in call order.
pub struct FsDebugSink {
    dir: PathBuf,
}

impl FsDebugSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl DebugSink for FsDebugSink {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn record(&self, trace: CallTrace) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("call-{}.json", Uuid::now_v7()));
        let body = serde_json::to_vec_pretty(&trace)?;
        tokio::fs::write(&path, body).await?;
        Ok(())
    }
}

/// A no-op sink for when debug capture is disabled
pub struct NoopDebugSink;

#[async_trait]
impl DebugSink for NoopDebugSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn record(&self, _trace: CallTrace) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_trace() -> CallTrace {
        CallTrace {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            system_prompt: "You are a Kubernetes investigator.".to_string(),
            history: vec![Turn::user("why is payments-api crashlooping?")],
            reply_text: String::new(),
            tool_calls: vec![ToolCallRequest::new(
                "c1",
                "get_pod_logs",
                json!({ "pod": "payments-api-0" }),
            )],
            usage: TokenUsage::new(420, 30),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fs_sink_writes_one_file_per_call() {
        let dir = std::env::temp_dir().join(format!("opsloop-debug-{}", Uuid::now_v7()));
        let sink = FsDebugSink::new(&dir);

        sink.record(sample_trace()).await.unwrap();
        sink.record(sample_trace()).await.unwrap();

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            files.push(entry.path());
        }
        assert_eq!(files.len(), 2);

        let body = tokio::fs::read_to_string(&files[0]).await.unwrap();
        let back: CallTrace = serde_json::from_str(&body).unwrap();
        assert_eq!(back.provider, "anthropic");
        assert_eq!(back.tool_calls[0].name, "get_pod_logs");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_noop_sink_disabled() {
        let sink = NoopDebugSink;
        assert!(!sink.is_enabled());
        sink.record(sample_trace()).await.unwrap();
    }

    #[tokio::test]
    async fn test_emit_trace_swallows_failures() {
        struct BrokenSink;

        #[async_trait]
        impl DebugSink for BrokenSink {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn is_enabled(&self) -> bool {
                true
            }
            async fn record(&self, _trace: CallTrace) -> Result<(), SinkError> {
                Err(SinkError::Io(std::io::Error::other("disk on fire")))
            }
        }

        let sink: Arc<dyn DebugSink> = Arc::new(BrokenSink);
        // Must not panic or propagate
        emit_trace(&sink, sample_trace()).await;
    }
}
