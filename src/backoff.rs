//! Exponential retry delays for the sync loop.

use std::time::Duration;

/// Delays of `base * 2^(n-1)` for the n-th consecutive failure, never
/// exceeding `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_retries: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            base,
            cap,
            max_retries,
            failures: 0,
        }
    }

    /// Consecutive failures recorded since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failure. Returns the delay to wait before the next attempt,
    /// or `None` once `max_retries` consecutive failures have piled up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.max_retries {
            return None;
        }
        Some(delay_for(self.base, self.cap, self.failures))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

fn delay_for(base: Duration, cap: Duration, failure: u32) -> Duration {
    let exponent = failure.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |d| d.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 10);
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().unwrap().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut b = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 3);
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert_eq!(b.next_delay(), None);
        assert_eq!(b.failures(), 4);
    }

    #[test]
    fn reset_starts_over() {
        let mut b = Backoff::new(Duration::from_secs(2), Duration::from_secs(60), 5);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn huge_exponents_do_not_overflow() {
        assert_eq!(
            delay_for(Duration::from_secs(3600), Duration::from_secs(7200), 64),
            Duration::from_secs(7200)
        );
    }
}
