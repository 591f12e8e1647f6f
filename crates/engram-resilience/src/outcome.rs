use serde::{Deserialize, Serialize};

use crate::taxonomy::ErrorDetail;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `OperationStatus` values.
///
/// `Retrying` only marks an in-flight retry loop; a returned result must
/// carry one of the three terminal statuses.
pub enum OperationStatus {
    Success,
    PartialSuccess,
    Failure,
    Retrying,
}

impl OperationStatus {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Failure => "failure",
            Self::Retrying => "retrying",
        }
    }

    /// Returns true for the statuses a caller may observe.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retrying)
    }
}

/// Public struct `OperationResult` used across Engram components.
///
/// Uniform envelope for every operation the layer exposes. `errors` holds the
/// classified detail of every failed attempt in attempt order; a late-success
/// result keeps the earlier details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResult<T> {
    pub status: OperationStatus,
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub operation_name: String,
    pub duration_ms: u64,
}

impl<T> OperationResult<T> {
    /// Builds a SUCCESS result carrying `data`.
    pub fn success(operation_name: impl Into<String>, data: T) -> Self {
        Self {
            status: OperationStatus::Success,
            data: Some(data),
            errors: Vec::new(),
            warnings: Vec::new(),
            operation_name: operation_name.into(),
            duration_ms: 0,
        }
    }

    /// Builds a PARTIAL_SUCCESS result: usable `data` plus the faults that
    /// degraded it.
    pub fn partial_success(
        operation_name: impl Into<String>,
        data: T,
        errors: Vec<ErrorDetail>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            status: OperationStatus::PartialSuccess,
            data: Some(data),
            errors,
            warnings,
            operation_name: operation_name.into(),
            duration_ms: 0,
        }
    }

    /// Builds a FAILURE result; by contract it never carries data.
    pub fn failure(operation_name: impl Into<String>, errors: Vec<ErrorDetail>) -> Self {
        Self {
            status: OperationStatus::Failure,
            data: None,
            errors,
            warnings: Vec::new(),
            operation_name: operation_name.into(),
            duration_ms: 0,
        }
    }

    /// Sets the observed wall-clock duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Attaches a non-fatal warning.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Returns true when the status is SUCCESS.
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }

    /// Returns true when the status is PARTIAL_SUCCESS.
    pub fn is_partial_success(&self) -> bool {
        self.status == OperationStatus::PartialSuccess
    }

    /// Returns true when the status is FAILURE.
    pub fn is_failure(&self) -> bool {
        self.status == OperationStatus::Failure
    }
}
