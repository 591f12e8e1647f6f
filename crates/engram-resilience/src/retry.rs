use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use engram_backend::StoreError;
use engram_core::CancelSignal;
use serde::{Deserialize, Serialize};

use crate::outcome::{OperationResult, OperationStatus};
use crate::taxonomy::{classify_store_error, ErrorCategory, ErrorDetail, ErrorSeverity};
use crate::{default_clock, ClockFn, EventSink};

/// Base delay before the first retry.
pub const BASE_BACKOFF_MS: u64 = 200;
/// Ceiling applied to the exponential delay curve.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Public struct `RetryPolicy` used across Engram components.
///
/// Immutable retry configuration. One instance lives on each handler and may
/// be overridden per call site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
    pub retryable_categories: BTreeSet<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: BASE_BACKOFF_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            exponential_base: 2.0,
            jitter: true,
            retryable_categories: BTreeSet::from([
                ErrorCategory::NotFound,
                ErrorCategory::Connection,
                ErrorCategory::Timeout,
                ErrorCategory::Integrity,
                ErrorCategory::Unknown,
            ]),
        }
    }
}

impl RetryPolicy {
    /// Preset for connection- and timeout-heavy call sites: more attempts,
    /// shorter initial delay, transient categories only.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            retryable_categories: BTreeSet::from([
                ErrorCategory::Connection,
                ErrorCategory::Timeout,
                ErrorCategory::Unknown,
            ]),
            ..Self::default()
        }
    }

    /// Preset for integrity-sensitive call sites: fewer attempts, longer
    /// initial delay.
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            ..Self::default()
        }
    }

    /// Checks the numeric invariants the delay curve relies on.
    pub fn validate(&self) -> Result<()> {
        if self.exponential_base <= 1.0 {
            bail!(
                "exponential_base must be greater than 1.0, got {}",
                self.exponential_base
            );
        }
        if self.base_delay_ms == 0 {
            bail!("base_delay_ms must be at least 1");
        }
        if self.max_delay_ms < self.base_delay_ms {
            bail!(
                "max_delay_ms {} must not undercut base_delay_ms {}",
                self.max_delay_ms,
                self.base_delay_ms
            );
        }
        Ok(())
    }

    /// Returns true when faults of `category` may be retried.
    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        self.retryable_categories.contains(&category)
    }
}

/// Computes the capped exponential delay after failed attempt `attempt`
/// (1-based).
pub fn backoff_delay_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    let factor = policy.exponential_base.max(1.0).powi(exponent as i32);
    let scaled = policy.base_delay_ms as f64 * factor;
    if !scaled.is_finite() {
        return policy.max_delay_ms;
    }
    (scaled.round() as u64).min(policy.max_delay_ms)
}

/// Applies the deterministic jitter factor in [0.5, 1.5] of `delay_ms`.
pub fn jittered_delay_ms(delay_ms: u64, jitter_enabled: bool) -> u64 {
    if !jitter_enabled || delay_ms <= 1 {
        return delay_ms;
    }

    let low = delay_ms / 2;
    let width = delay_ms;
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) ^ 0xA24B_AED4_963E_E407;
    let jitter = mixed % width.saturating_add(1);
    low.saturating_add(jitter)
}

/// Returns the delay to sleep after failed attempt `attempt` under `policy`.
pub fn retry_delay_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    jittered_delay_ms(backoff_delay_ms(policy, attempt), policy.jitter)
}

/// Public struct `RetryExecutor` used across Engram components.
///
/// Drives one operation through up to `max_retries + 1` attempts and folds
/// the classified attempt history into an [`OperationResult`].
pub struct RetryExecutor {
    policy: RetryPolicy,
    clock: ClockFn,
    event_sink: Option<EventSink>,
}

impl RetryExecutor {
    /// Creates an executor over `policy` with the wall clock.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            clock: default_clock(),
            event_sink: None,
        }
    }

    /// Replaces the timestamp source, for tests that freeze time.
    pub fn with_clock(mut self, clock: ClockFn) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches a structured-event sink.
    pub fn with_event_sink(mut self, event_sink: EventSink) -> Self {
        self.event_sink = Some(event_sink);
        self
    }

    /// Returns the configured policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` under the policy.
    ///
    /// Cancellation is checked before every attempt, never mid-attempt; a
    /// cancelled run fails with a timeout-category detail. Sleeps happen only
    /// between attempts.
    pub async fn run<T, F, Fut>(
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
        let started = Instant::now();
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut errors: Vec<ErrorDetail> = Vec::new();
        let mut data: Option<T> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                errors.push(self.cancellation_detail(operation_name, context, attempt));
                break;
            }

            match operation().await {
                Ok(value) => {
                    data = Some(value);
                    break;
                }
                Err(error) => {
                    let detail = classify_store_error(
                        &error,
                        operation_name,
                        context,
                        attempt,
                        (self.clock)(),
                    );
                    let category = detail.category;
                    let abort = detail.severity == ErrorSeverity::Critical
                        || !self.policy.is_retryable(category);
                    errors.push(detail);
                    if abort || attempt == max_attempts {
                        break;
                    }

                    let delay_ms = retry_delay_ms(&self.policy, attempt);
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt,
                        delay_ms = delay_ms,
                        category = category.as_str(),
                        "retry scheduled after failed attempt"
                    );
                    self.emit_retry_scheduled(operation_name, attempt, delay_ms, category);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }

        // The terminal status comes from the final attempt's outcome; an
        // in-flight Retrying marker must never escape this loop.
        let status = if data.is_some() {
            OperationStatus::Success
        } else {
            OperationStatus::Failure
        };
        OperationResult {
            status,
            data,
            errors,
            warnings: Vec::new(),
            operation_name: operation_name.to_string(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn cancellation_detail(
        &self,
        operation_name: &str,
        context: &BTreeMap<String, String>,
        attempt: u32,
    ) -> ErrorDetail {
        ErrorDetail {
            category: ErrorCategory::Timeout,
            severity: ErrorCategory::Timeout.severity(),
            message: format!("operation cancelled before attempt {attempt}"),
            operation_name: operation_name.to_string(),
            context: context.clone(),
            attempt_number: attempt,
            timestamp_unix_ms: (self.clock)(),
        }
    }

    fn emit_retry_scheduled(
        &self,
        operation_name: &str,
        attempt: u32,
        delay_ms: u64,
        category: ErrorCategory,
    ) {
        let Some(sink) = &self.event_sink else {
            return;
        };
        sink(serde_json::json!({
            "type": "retry_scheduled",
            "operation": operation_name,
            "attempt": attempt,
            "delay_ms": delay_ms,
            "category": category.as_str(),
        }));
    }
}
