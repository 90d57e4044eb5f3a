// Error types for the investigation engine

use opsloop_reliability::CircuitOpenError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that propagate out of the investigation engine.
///
/// Most loop outcomes (iteration cap, parse failure, a model that stops
/// producing output) are not errors; they come back as structured
/// [`crate::engine::LoopResult`]s. This enum covers the conditions that
/// genuinely abort: bad configuration, an open circuit, and provider or
/// internal faults surfaced outside a loop run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (unknown provider id, missing credentials).
    /// Fatal at construction, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The circuit guarding the provider rejected the call instantly
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Provider call failure (network, auth, quota)
    #[error("provider error: {0}")]
    Provider(String),

    /// Tool execution fault surfaced outside the feed-back path
    #[error("tool error: {0}")]
    Tool(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }

    /// Create a tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }
}
