use std::time::Duration;

use rand::Rng;

/// Backoff schedule for conflicting or transient Kubernetes/store writes:
/// exponential from 200ms, capped at 5s, jittered +/-50%.
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_MS: u64 = 200;
const CAP_MS: u64 = 5_000;

pub fn backoff(attempt: u32) -> Duration {
    let exp = BASE_MS.saturating_mul(1u64 << attempt.min(16)).min(CAP_MS);
    let jitter = rand::rng().random_range(0.5..1.5);
    Duration::from_millis(((exp as f64) * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded() {
        for attempt in 0..10 {
            let d = backoff(attempt);
            assert!(d >= Duration::from_millis(100), "attempt {attempt}: {d:?}");
            assert!(d <= Duration::from_millis(7_500), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn backoff_grows_until_the_cap() {
        // Compare midpoints to dodge jitter.
        let mid = |attempt: u32| BASE_MS.saturating_mul(1 << attempt).min(CAP_MS);
        assert!(mid(1) > mid(0));
        assert_eq!(mid(5), CAP_MS);
        assert_eq!(mid(9), CAP_MS);
    }
}
