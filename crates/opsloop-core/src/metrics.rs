// Metrics Sink
//
// Per-invocation observability records for investigation loops. One
// LoopRecord is emitted per terminal outcome; the JSONL sink appends them to
// a line-delimited file as an audit trail that both humans and downstream
// analysis can read.
//
// Sinks are best-effort by contract: the engine swallows and logs sink
// failures, they never affect the loop outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::engine::{CompletionReason, LoopStatus};

// ============================================================================
// Record Shape
// ============================================================================

/// One investigation loop summarized for the audit trail.
///
/// Serialized with camelCase keys so records line up with the dashboards
/// that consume them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopRecord {
    /// Provider identifier, e.g. "anthropic"
    pub sdk: String,
    /// Model the loop ran against
    pub model_version: String,
    /// Provider calls made
    pub iteration_count: u32,
    /// Total tool invocations across all iterations
    pub tool_call_count: u32,
    /// Distinct tool names invoked, sorted
    pub unique_tools_used: Vec<String>,
    pub status: LoopStatus,
    pub completion_reason: CompletionReason,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub duration_ms: u64,
    /// Wall-clock time the loop finished (RFC 3339 UTC)
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Sink Trait
// ============================================================================

/// Errors that can occur while recording to a sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trait for metrics sinks
///
/// Implementations persist or forward loop records. Failures are reported
/// but callers treat recording as best-effort.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Name of this sink (for logging)
    fn name(&self) -> &'static str;

    /// Check if the sink is enabled/configured
    fn is_enabled(&self) -> bool;

    /// Record one loop outcome
    async fn record(&self, record: LoopRecord) -> Result<(), SinkError>;

    /// Flush any buffered records (called on shutdown)
    async fn flush(&self) -> Result<(), SinkError>;

    /// Shutdown the sink gracefully
    async fn shutdown(&self) -> Result<(), SinkError> {
        self.flush().await
    }
}

// ============================================================================
// JSONL Sink
// ============================================================================

/// Appends one JSON object per record to a line-delimited file.
///
/// The file (and its parent directory) is created on first write; the handle
/// is kept open for subsequent records.
pub struct JsonlMetricsSink {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonlMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl MetricsSink for JsonlMetricsSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn record(&self, record: LoopRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        let file = match guard.as_mut() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                guard.insert(file)
            }
        };

        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

// ============================================================================
// In-Memory and Noop Sinks
// ============================================================================

/// Captures records in memory (test sink)
#[derive(Default)]
pub struct InMemoryMetricsSink {
    records: std::sync::Mutex<Vec<LoopRecord>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<LoopRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LoopRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn record(&self, record: LoopRecord) -> Result<(), SinkError> {
        self.lock().push(record);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A no-op sink for when metrics are disabled
pub struct NoopMetricsSink;

#[async_trait]
impl MetricsSink for NoopMetricsSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn record(&self, _record: LoopRecord) -> Result<(), SinkError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> LoopRecord {
        LoopRecord {
            sdk: "anthropic".to_string(),
            model_version: "claude-sonnet-4-20250514".to_string(),
            iteration_count: 3,
            tool_call_count: 4,
            unique_tools_used: vec!["get_pod_events".to_string(), "get_pod_logs".to_string()],
            status: LoopStatus::Success,
            completion_reason: CompletionReason::InvestigationComplete,
            input_tokens: 1200,
            output_tokens: 340,
            cache_read_tokens: 9000,
            duration_ms: 4180,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let json = serde_json::to_value(sample_record()).unwrap();
        let obj = json.as_object().unwrap();

        for key in [
            "sdk",
            "modelVersion",
            "iterationCount",
            "toolCallCount",
            "uniqueToolsUsed",
            "status",
            "completionReason",
            "inputTokens",
            "outputTokens",
            "cacheReadTokens",
            "durationMs",
            "timestamp",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }

        assert_eq!(json["status"], "success");
        assert_eq!(json["completionReason"], "investigation_complete");
    }

    #[test]
    fn test_record_round_trip() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: LoopRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!(
            "opsloop-metrics-{}.jsonl",
            uuid::Uuid::now_v7()
        ));
        let sink = JsonlMetricsSink::new(&path);

        sink.record(sample_record()).await.unwrap();
        let mut second = sample_record();
        second.status = LoopStatus::Failed;
        second.completion_reason = CompletionReason::MaxIterations;
        sink.record(second).await.unwrap();
        sink.flush().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: LoopRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.status, LoopStatus::Success);
        let second: LoopRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.completion_reason, CompletionReason::MaxIterations);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_in_memory_sink_captures() {
        let sink = InMemoryMetricsSink::new();
        assert!(sink.is_empty());

        sink.record(sample_record()).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].sdk, "anthropic");
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoopMetricsSink;
        assert!(!sink.is_enabled());
        assert_eq!(sink.name(), "noop");

        sink.record(sample_record()).await.unwrap();
        sink.flush().await.unwrap();
    }
}
