use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use engram_core::lock_or_recover_mutex;
use serde::{Deserialize, Serialize};

/// Public struct `CircuitBreakerConfig` used across Engram components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Checks the invariants the state machine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            bail!("failure_threshold must be at least 1");
        }
        if self.reset_timeout_ms == 0 {
            bail!("reset_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `CircuitState` values.
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Outcome of asking a breaker for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerAdmission {
    /// Proceed; the circuit is closed.
    Allowed,
    /// Proceed as the single half-open trial call.
    AllowedTrial,
    /// Rejected; the circuit stays open until at least the deadline.
    RejectedOpen { open_until_unix_ms: u64 },
    /// Rejected; another half-open trial is already in flight.
    RejectedTrialInFlight,
}

impl BreakerAdmission {
    /// Returns true when the caller may invoke the operation.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::AllowedTrial)
    }
}

/// State transition reported back to the caller for logging and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened { open_until_unix_ms: u64 },
    Closed,
}

/// Serializable view of one breaker for operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub opened_at_unix_ms: Option<u64>,
    pub trial_in_flight: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at_unix_ms: Option<u64>,
    trial_in_flight: bool,
}

impl Default for BreakerInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at_unix_ms: None,
            trial_in_flight: false,
        }
    }
}

/// Public struct `CircuitBreaker` used across Engram components.
///
/// One breaker guards one operation class for the process lifetime. Callers
/// pass the current time so transitions are testable without sleeping.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker under `config`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Decides whether a call may proceed at `now_unix_ms`.
    ///
    /// An open breaker past its reset deadline converts the calling
    /// invocation into the half-open trial; only one trial is ever in
    /// flight.
    pub fn admit(&self, now_unix_ms: u64) -> BreakerAdmission {
        let mut inner = lock_or_recover_mutex(&self.inner);
        match inner.state {
            CircuitState::Closed => BreakerAdmission::Allowed,
            CircuitState::Open => {
                let opened_at = inner.opened_at_unix_ms.unwrap_or(0);
                let deadline = opened_at.saturating_add(self.config.reset_timeout_ms);
                if now_unix_ms < deadline {
                    BreakerAdmission::RejectedOpen {
                        open_until_unix_ms: deadline,
                    }
                } else {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    BreakerAdmission::AllowedTrial
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    BreakerAdmission::RejectedTrialInFlight
                } else {
                    inner.trial_in_flight = true;
                    BreakerAdmission::AllowedTrial
                }
            }
        }
    }

    /// Records a terminal operation success.
    pub fn record_success(&self) -> Option<BreakerTransition> {
        let mut inner = lock_or_recover_mutex(&self.inner);
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        if inner.state == CircuitState::Closed {
            return None;
        }
        inner.state = CircuitState::Closed;
        inner.opened_at_unix_ms = None;
        Some(BreakerTransition::Closed)
    }

    /// Records a terminal operation failure at `now_unix_ms`.
    pub fn record_failure(&self, now_unix_ms: u64) -> Option<BreakerTransition> {
        let mut inner = lock_or_recover_mutex(&self.inner);
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures < self.config.failure_threshold {
                    return None;
                }
                inner.state = CircuitState::Open;
                inner.opened_at_unix_ms = Some(now_unix_ms);
                Some(BreakerTransition::Opened {
                    open_until_unix_ms: now_unix_ms.saturating_add(self.config.reset_timeout_ms),
                })
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at_unix_ms = Some(now_unix_ms);
                inner.trial_in_flight = false;
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                Some(BreakerTransition::Opened {
                    open_until_unix_ms: now_unix_ms.saturating_add(self.config.reset_timeout_ms),
                })
            }
            CircuitState::Open => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                None
            }
        }
    }

    /// Returns the current state for operators.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = lock_or_recover_mutex(&self.inner);
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at_unix_ms: inner.opened_at_unix_ms,
            trial_in_flight: inner.trial_in_flight,
        }
    }

    /// Administrative re-arm back to a closed, zeroed breaker.
    pub fn reset(&self) {
        let mut inner = lock_or_recover_mutex(&self.inner);
        *inner = BreakerInner::default();
    }
}

/// Public struct `BreakerRegistry` used across Engram components.
///
/// Lazily creates one breaker per operation class. The map lock is held only
/// for lookup so unrelated classes never contend on each other's state.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Creates an empty registry; breakers appear on first use.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the breaker guarding `operation_class`, creating it if
    /// needed.
    pub fn breaker(&self, operation_class: &str) -> Arc<CircuitBreaker> {
        let mut breakers = lock_or_recover_mutex(&self.breakers);
        Arc::clone(
            breakers
                .entry(operation_class.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config))),
        )
    }

    /// Returns a snapshot per known operation class.
    pub fn snapshots(&self) -> BTreeMap<String, BreakerSnapshot> {
        let breakers = lock_or_recover_mutex(&self.breakers);
        breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }

    /// Re-arms every known breaker.
    pub fn reset_all(&self) {
        let breakers = lock_or_recover_mutex(&self.breakers);
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}
