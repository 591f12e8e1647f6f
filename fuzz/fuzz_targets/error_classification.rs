#![no_main]

use std::collections::BTreeMap;

use engram_backend::StoreError;
use engram_resilience::{
    categorize_store_error, classify_store_error, ErrorCategory, ErrorSeverity,
};
use libfuzzer_sys::fuzz_target;

fn store_error_from(selector: u8, payload: String) -> StoreError {
    match selector % 8 {
        0 => StoreError::Validation(payload),
        1 => StoreError::NotFound(payload),
        2 => StoreError::Connection(payload),
        3 => StoreError::Timeout {
            elapsed_ms: payload.len() as u64,
        },
        4 => StoreError::Integrity(payload),
        5 => match serde_json::from_str::<serde_json::Value>(&payload) {
            // Valid JSON yields no serde fault; route those inputs through
            // the catch-all variant instead.
            Ok(_) => StoreError::Other(payload),
            Err(error) => StoreError::Serde(error),
        },
        6 => StoreError::Unavailable(payload),
        _ => StoreError::Other(payload),
    }
}

fuzz_target!(|data: &[u8]| {
    let selector = data.first().copied().unwrap_or(0);
    let payload = String::from_utf8_lossy(data.get(1..).unwrap_or(&[])).into_owned();
    let error = store_error_from(selector, payload);

    let category = categorize_store_error(&error);
    let expected_severity = match category {
        ErrorCategory::Validation => ErrorSeverity::Critical,
        ErrorCategory::NotFound | ErrorCategory::Integrity => ErrorSeverity::High,
        ErrorCategory::Connection | ErrorCategory::Timeout => ErrorSeverity::Medium,
        ErrorCategory::Unknown => ErrorSeverity::Low,
    };
    assert_eq!(category.severity(), expected_severity);
    assert!(!category.as_str().is_empty());
    assert!(!expected_severity.as_str().is_empty());

    let mut context = BTreeMap::new();
    context.insert("memory_id".to_string(), "mem-fuzz".to_string());
    let detail = classify_store_error(&error, "vector_write", &context, 3, 1_700_000_000_000);
    assert_eq!(detail.category, category);
    assert_eq!(detail.severity, expected_severity);
    assert_eq!(detail.message, error.to_string());
    assert_eq!(detail.operation_name, "vector_write");
    assert_eq!(detail.context, context);
    assert_eq!(detail.attempt_number, 3);
    assert_eq!(detail.timestamp_unix_ms, 1_700_000_000_000);
});
