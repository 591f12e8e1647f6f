#![no_main]

use engram_resilience::{backoff_delay_ms, jittered_delay_ms, retry_delay_ms, RetryPolicy};
use libfuzzer_sys::fuzz_target;

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    for (index, byte) in bytes.iter_mut().enumerate() {
        *byte = data.get(offset + index).copied().unwrap_or(0);
    }
    u64::from_le_bytes(bytes)
}

fuzz_target!(|data: &[u8]| {
    let attempt = (read_u64(data, 0) % 1_000) as u32;
    let base_delay_ms = read_u64(data, 8) % 100_000 + 1;
    let max_delay_ms = base_delay_ms + read_u64(data, 16) % 1_000_000;
    let exponential_base = 1.0 + f64::from(data.get(24).copied().unwrap_or(1).max(1)) / 16.0;

    let policy = RetryPolicy {
        max_retries: 3,
        base_delay_ms,
        max_delay_ms,
        exponential_base,
        jitter: false,
        ..RetryPolicy::default()
    };
    policy.validate().expect("constructed policy is valid");

    let delay = backoff_delay_ms(&policy, attempt);
    assert!(delay <= policy.max_delay_ms);
    if attempt <= 1 {
        assert_eq!(delay, policy.base_delay_ms.min(policy.max_delay_ms));
    }
    assert_eq!(retry_delay_ms(&policy, attempt), delay);

    // The jitter factor stays inside [0.5, 1.5] of the capped delay.
    let jittered = jittered_delay_ms(delay, true);
    if delay > 1 {
        assert!(jittered >= delay / 2);
        assert!(jittered <= delay / 2 + delay);
    } else {
        assert_eq!(jittered, delay);
    }
    assert_eq!(jittered_delay_ms(delay, false), delay);
});
