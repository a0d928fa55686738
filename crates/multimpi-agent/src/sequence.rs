//! Per-instance sequence numbers.

use std::sync::atomic::{AtomicU64, Ordering};

static LAST: AtomicU64 = AtomicU64::new(0);

/// A sequence number for a new agent instance.
///
/// Seeded from the wall clock in milliseconds so a restarted process at the
/// same identity presents a different number, and strictly increasing
/// within this process.
pub fn next_sequence() -> u64 {
    let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing() {
        let mut last = next_sequence();
        for _ in 0..1000 {
            let next = next_sequence();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_seeded_from_clock() {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        assert!(next_sequence() >= now);
    }
}
