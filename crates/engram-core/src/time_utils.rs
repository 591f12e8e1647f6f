/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the milliseconds elapsed between two Unix-millisecond timestamps.
///
/// Clock skew can make `end_unix_ms` precede `start_unix_ms`; the difference
/// saturates at zero instead of wrapping.
pub fn saturating_elapsed_ms(start_unix_ms: u64, end_unix_ms: u64) -> u64 {
    end_unix_ms.saturating_sub(start_unix_ms)
}
