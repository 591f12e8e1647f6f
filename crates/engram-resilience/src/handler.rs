use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use engram_backend::StoreError;
use engram_core::{saturating_elapsed_ms, CancelSignal};

use crate::breaker::{BreakerAdmission, BreakerRegistry, BreakerSnapshot, BreakerTransition, CircuitBreakerConfig};
use crate::outcome::OperationResult;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::taxonomy::{ErrorCategory, ErrorDetail};
use crate::{default_clock, ClockFn, EventSink};

/// Public struct `ErrorHandlerConfig` used across Engram components.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorHandlerConfig {
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl ErrorHandlerConfig {
    /// Checks both nested configurations.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate().context("invalid retry policy")?;
        self.breaker
            .validate()
            .context("invalid circuit breaker config")?;
        Ok(())
    }
}

/// Public struct `ErrorHandler` used across Engram components.
///
/// The single choke point every backend call goes through: a per-class
/// circuit breaker preflight, then the retry executor, then the terminal
/// outcome fed back into the breaker. Nothing reaches a store client without
/// passing here first.
pub struct ErrorHandler {
    retry_policy: RetryPolicy,
    registry: BreakerRegistry,
    clock: ClockFn,
    event_sink: Option<EventSink>,
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("retry_policy", &self.retry_policy)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ErrorHandler {
    /// Creates a handler after validating `config`.
    pub fn new(config: ErrorHandlerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            retry_policy: config.retry,
            registry: BreakerRegistry::new(config.breaker),
            clock: default_clock(),
            event_sink: None,
        })
    }

    /// Replaces the timestamp source, for tests that freeze time.
    pub fn with_clock(mut self, clock: ClockFn) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches a structured-event sink shared with the retry executor.
    pub fn with_event_sink(mut self, event_sink: EventSink) -> Self {
        self.event_sink = Some(event_sink);
        self
    }

    /// Returns the breaker arena, one breaker per operation class.
    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    /// Returns a snapshot of every known breaker.
    pub fn breaker_snapshots(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.registry.snapshots()
    }

    /// Runs `operation` under the handler's default retry policy.
    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        context: &BTreeMap<String, String>,
        cancel: &CancelSignal,
        operation: F,
    ) -> OperationResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let policy = self.retry_policy.clone();
        self.execute_with_policy(&policy, operation_name, context, cancel, operation)
            .await
    }

    /// Runs `operation` under a call-site policy override.
    ///
    /// The breaker preflight rejects without touching the retry executor;
    /// otherwise the terminal success or failure is what the breaker counts,
    /// never the individual attempts inside the loop.
    pub async fn execute_with_policy<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        operation_name: &str,
        context: &BTreeMap<String, String>,
        cancel: &CancelSignal,
        operation: F,
    ) -> OperationResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let started = Instant::now();
        let breaker = self.registry.breaker(operation_name);

        match breaker.admit((self.clock)()) {
            BreakerAdmission::Allowed | BreakerAdmission::AllowedTrial => {}
            BreakerAdmission::RejectedOpen { open_until_unix_ms } => {
                let remaining_ms = saturating_elapsed_ms((self.clock)(), open_until_unix_ms);
                tracing::debug!(
                    operation = operation_name,
                    open_until_unix_ms = open_until_unix_ms,
                    remaining_ms = remaining_ms,
                    "circuit open, rejecting call"
                );
                self.emit_breaker_skip(operation_name, Some(open_until_unix_ms), "open");
                return self
                    .rejection_result(
                        operation_name,
                        context,
                        format!(
                            "circuit breaker for {operation_name} is open until {open_until_unix_ms} unix ms"
                        ),
                        started,
                    );
            }
            BreakerAdmission::RejectedTrialInFlight => {
                tracing::debug!(
                    operation = operation_name,
                    "half-open trial in flight, rejecting call"
                );
                self.emit_breaker_skip(operation_name, None, "trial_in_flight");
                return self
                    .rejection_result(
                        operation_name,
                        context,
                        format!(
                            "circuit breaker for {operation_name} is half-open with a trial in flight"
                        ),
                        started,
                    );
            }
        }

        let mut executor =
            RetryExecutor::new(policy.clone()).with_clock(Arc::clone(&self.clock));
        if let Some(sink) = &self.event_sink {
            executor = executor.with_event_sink(Arc::clone(sink));
        }
        let result = executor
            .run(operation_name, context, cancel, operation)
            .await;

        let transition = if result.is_failure() {
            breaker.record_failure((self.clock)())
        } else {
            breaker.record_success()
        };
        match transition {
            Some(BreakerTransition::Opened { open_until_unix_ms }) => {
                tracing::warn!(
                    operation = operation_name,
                    open_until_unix_ms = open_until_unix_ms,
                    "circuit opened after repeated failures"
                );
                self.emit_breaker_opened(operation_name, open_until_unix_ms);
            }
            Some(BreakerTransition::Closed) => {
                tracing::debug!(operation = operation_name, "circuit closed after recovery");
                self.emit_breaker_closed(operation_name);
            }
            None => {}
        }
        result
    }

    fn rejection_result<T>(
        &self,
        operation_name: &str,
        context: &BTreeMap<String, String>,
        message: String,
        started: Instant,
    ) -> OperationResult<T> {
        // attempt_number 0 marks a preflight rejection: no attempt ran.
        let detail = ErrorDetail {
            category: ErrorCategory::Connection,
            severity: ErrorCategory::Connection.severity(),
            message,
            operation_name: operation_name.to_string(),
            context: context.clone(),
            attempt_number: 0,
            timestamp_unix_ms: (self.clock)(),
        };
        OperationResult::failure(operation_name, vec![detail])
            .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    fn emit_breaker_skip(
        &self,
        operation_name: &str,
        open_until_unix_ms: Option<u64>,
        reason: &str,
    ) {
        let Some(sink) = &self.event_sink else {
            return;
        };
        sink(serde_json::json!({
            "type": "breaker_skip",
            "operation": operation_name,
            "open_until_unix_ms": open_until_unix_ms,
            "reason": reason,
        }));
    }

    fn emit_breaker_opened(&self, operation_name: &str, open_until_unix_ms: u64) {
        let Some(sink) = &self.event_sink else {
            return;
        };
        sink(serde_json::json!({
            "type": "breaker_opened",
            "operation": operation_name,
            "open_until_unix_ms": open_until_unix_ms,
        }));
    }

    fn emit_breaker_closed(&self, operation_name: &str) {
        let Some(sink) = &self.event_sink else {
            return;
        };
        sink(serde_json::json!({
            "type": "breaker_closed",
            "operation": operation_name,
        }));
    }
}
