use std::collections::BTreeMap;

use engram_backend::StoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ErrorSeverity` values.
///
/// Severity drives recovery: `Critical` faults abort retrying immediately.
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl ErrorSeverity {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ErrorCategory` values.
pub enum ErrorCategory {
    Validation,
    NotFound,
    Connection,
    Timeout,
    Integrity,
    Unknown,
}

impl ErrorCategory {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Integrity => "integrity",
            Self::Unknown => "unknown",
        }
    }

    /// Returns the fixed severity assigned to this category.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation => ErrorSeverity::Critical,
            Self::NotFound | Self::Integrity => ErrorSeverity::High,
            Self::Connection | Self::Timeout => ErrorSeverity::Medium,
            Self::Unknown => ErrorSeverity::Low,
        }
    }
}

/// Public struct `ErrorDetail` used across Engram components.
///
/// Immutable description of one failed attempt; results accumulate these in
/// attempt order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub operation_name: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub attempt_number: u32,
    pub timestamp_unix_ms: u64,
}

/// Returns the taxonomy category for a raw store fault.
pub fn categorize_store_error(error: &StoreError) -> ErrorCategory {
    match error {
        StoreError::Validation(_) | StoreError::Serde(_) => ErrorCategory::Validation,
        StoreError::NotFound(_) => ErrorCategory::NotFound,
        StoreError::Connection(_) | StoreError::Unavailable(_) => ErrorCategory::Connection,
        StoreError::Timeout { .. } => ErrorCategory::Timeout,
        StoreError::Integrity(_) => ErrorCategory::Integrity,
        StoreError::Other(_) => ErrorCategory::Unknown,
    }
}

/// Maps a raw store fault onto the taxonomy.
///
/// Total over every [`StoreError`] variant; the severity comes from the fixed
/// category table, the message from the fault's `Display`.
pub fn classify_store_error(
    error: &StoreError,
    operation_name: &str,
    context: &BTreeMap<String, String>,
    attempt_number: u32,
    now_unix_ms: u64,
) -> ErrorDetail {
    let category = categorize_store_error(error);
    ErrorDetail {
        category,
        severity: category.severity(),
        message: error.to_string(),
        operation_name: operation_name.to_string(),
        context: context.clone(),
        attempt_number,
        timestamp_unix_ms: now_unix_ms,
    }
}
