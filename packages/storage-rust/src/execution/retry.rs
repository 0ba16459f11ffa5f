//! Retry pacing for conflicting units of work.

use std::time::Duration;

use rand::Rng;

/// Blocking sleep between retry attempts. A seam so tests can observe
/// delays instead of waiting them out.
pub trait RetrySleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// The production sleeper: `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl RetrySleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Backoff before retry `attempt_index` (0 for the first retry): a
/// uniformly dithered delay in `[0, 250 * attempt_index)` milliseconds.
/// The first retry goes immediately; later ones wait longer on average,
/// spreading out herds of workers that conflicted at the same instant.
#[must_use]
pub fn backoff_for_attempt(attempt_index: u32) -> Duration {
    if attempt_index == 0 {
        return Duration::ZERO;
    }
    let ceiling_ms = 250.0 * f64::from(attempt_index);
    let dithered_ms = rand::rng().random::<f64>() * ceiling_ms;
    // dithered_ms is non-negative and far below u64::MAX.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = dithered_ms as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_has_no_delay() {
        assert_eq!(backoff_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn thread_sleeper_skips_zero_sleeps() {
        // Nothing to observe directly; this pins the zero path as valid.
        ThreadSleeper.sleep(Duration::ZERO);
    }

    proptest::proptest! {
        #[test]
        fn delay_is_dithered_below_the_linear_ceiling(attempt in 1u32..50) {
            let delay = backoff_for_attempt(attempt);
            let ceiling = Duration::from_millis(250 * u64::from(attempt));
            proptest::prop_assert!(delay < ceiling);
        }
    }
}
