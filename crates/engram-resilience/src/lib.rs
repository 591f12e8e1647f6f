//! Fault classification, retry, and circuit breaking for Engram operations.
//!
//! Every raw [`engram_backend::StoreError`] is classified into the taxonomy
//! before any other processing; the [`ErrorHandler`] choke point then drives
//! retries under a [`RetryPolicy`] and guards each operation class with its
//! own circuit breaker.

pub mod breaker;
pub mod handler;
pub mod outcome;
pub mod retry;
pub mod taxonomy;

use std::sync::Arc;

/// Shared timestamp source returning unix milliseconds.
pub type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Structured-event callback used by observability hooks.
pub type EventSink = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Returns the wall-clock source used when no clock is injected.
pub fn default_clock() -> ClockFn {
    Arc::new(engram_core::current_unix_timestamp_ms)
}

pub use breaker::{
    BreakerAdmission, BreakerRegistry, BreakerSnapshot, BreakerTransition, CircuitBreaker,
    CircuitBreakerConfig, CircuitState,
};
pub use handler::{ErrorHandler, ErrorHandlerConfig};
pub use outcome::{OperationResult, OperationStatus};
pub use retry::{
    backoff_delay_ms, jittered_delay_ms, retry_delay_ms, RetryExecutor, RetryPolicy,
    BASE_BACKOFF_MS, DEFAULT_MAX_DELAY_MS,
};
pub use taxonomy::{
    categorize_store_error, classify_store_error, ErrorCategory, ErrorDetail, ErrorSeverity,
};
