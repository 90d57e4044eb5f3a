//! # Reliability Primitives
//!
//! Process-local failure handling for external dependencies:
//!
//! - [`CircuitBreaker`] - a failure-counting gate that stops calling a
//!   dependency after repeated failures until a cooldown elapses
//! - [`CircuitBreakerRegistry`] - a named arena so every caller guarding the
//!   same dependency shares one breaker instance
//! - [`RetryPolicy`] - configurable retry with exponential backoff and jitter
//!
//! ## Example
//!
//! ```
//! use opsloop_reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let breaker = CircuitBreaker::new(
//!     "embedding-api",
//!     CircuitBreakerConfig::default()
//!         .with_failure_threshold(3)
//!         .with_cooldown(Duration::from_secs(30)),
//! );
//!
//! match breaker.execute(|| async { call_service().await }).await {
//!     Ok(value) => println!("got {value}"),
//!     Err(CircuitBreakerError::Open(e)) => println!("rejected: retry in {}ms", e.remaining_ms),
//!     Err(CircuitBreakerError::Operation(e)) => println!("call failed: {e}"),
//! }
//! # }
//! # async fn call_service() -> Result<u32, String> { Ok(1) }
//! ```

mod breaker;
mod registry;
mod retry;

pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitOpenError,
    CircuitPermit, CircuitState,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::RetryPolicy;
