//! Foundational low-level utilities shared across Engram crates.
//!
//! Provides atomic file-write helpers, time helpers, poisoned-lock recovery,
//! and the cooperative cancellation signal used by retry loops and reset
//! flows.

pub mod atomic_io;
pub mod sync;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use sync::{lock_or_recover_mutex, CancelSignal};
pub use time_utils::{current_unix_timestamp_ms, saturating_elapsed_ms};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn unit_write_text_atomic_replaces_existing_content() {
        let dir = tempfile::tempdir().expect("temp dir");
        let target = dir.path().join("nested").join("state.json");

        write_text_atomic(target.as_path(), "first").expect("initial write");
        assert_eq!(read_to_string(&target).expect("read first"), "first");

        write_text_atomic(target.as_path(), "second").expect("overwrite");
        assert_eq!(read_to_string(&target).expect("read second"), "second");
    }

    #[test]
    fn unit_write_text_atomic_rejects_directory_target() {
        let dir = tempfile::tempdir().expect("temp dir");
        let error = write_text_atomic(dir.path(), "content").expect_err("directory target");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn unit_timestamp_ms_is_monotonic_non_decreasing() {
        let first = current_unix_timestamp_ms();
        let second = current_unix_timestamp_ms();
        assert!(second >= first);
    }

    #[test]
    fn unit_saturating_elapsed_ms_handles_clock_skew() {
        assert_eq!(saturating_elapsed_ms(1_000, 1_450), 450);
        assert_eq!(saturating_elapsed_ms(1_450, 1_000), 0);
        assert_eq!(saturating_elapsed_ms(7, 7), 0);
    }

    #[test]
    fn unit_lock_or_recover_mutex_returns_inner_after_panic() {
        let shared = std::sync::Arc::new(std::sync::Mutex::new(41_u64));
        let poisoner = std::sync::Arc::clone(&shared);
        let join = std::thread::spawn(move || {
            let _guard = poisoner.lock().expect("first lock succeeds");
            panic!("poison the mutex");
        });
        assert!(join.join().is_err());

        let mut guard = lock_or_recover_mutex(&shared);
        *guard += 1;
        assert_eq!(*guard, 42);
    }

    #[test]
    fn unit_cancel_signal_reports_cancellation_once_requested() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        signal.cancel();
        assert!(signal.is_cancelled());
        signal.cancel();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn functional_cancel_signal_wakes_pending_waiters() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = waiter.cancelled() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
            }
            waiter.is_cancelled()
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        signal.cancel();
        let observed = handle.await.expect("waiter task completes");
        assert!(observed);
    }

    #[tokio::test]
    async fn functional_cancelled_returns_immediately_when_already_cancelled() {
        let signal = CancelSignal::new();
        signal.cancel();
        signal.cancelled().await;
    }
}
