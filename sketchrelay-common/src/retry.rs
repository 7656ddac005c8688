use std::time::Duration;

/// Linear backoff between repeated attempts of the same operation.
///
/// The n-th call to [`next_backoff`](Self::next_backoff) returns `n * base`, so with a base of
/// 200ms the delays are 200ms, 400ms, 600ms and so on.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sketchrelay_common::RetryBackoff;
///
/// let mut backoff = RetryBackoff::new(Duration::from_millis(200));
/// assert_eq!(backoff.next_backoff(), Duration::from_millis(200));
/// assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
/// assert_eq!(backoff.attempt(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct RetryBackoff {
    base: Duration,
    attempt: u32,
}

impl RetryBackoff {
    /// Creates a new backoff that grows by `base` on every attempt.
    pub fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    /// Resets this backoff to its initial state.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Indicates whether a backoff attempt has been made since the last reset.
    pub fn started(&self) -> bool {
        self.attempt > 0
    }

    /// Returns the number of backoffs handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the delay to wait before the next attempt.
    pub fn next_backoff(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(self.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_growth_and_reset() {
        let mut backoff = RetryBackoff::new(Duration::from_millis(50));
        assert!(!backoff.started());

        let delays: Vec<_> = (0..3).map(|_| backoff.next_backoff()).collect();
        assert_eq!(
            delays,
            [50, 100, 150].map(Duration::from_millis).to_vec()
        );
        assert!(backoff.started());

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_backoff(), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_base() {
        let mut backoff = RetryBackoff::new(Duration::ZERO);
        assert_eq!(backoff.next_backoff(), Duration::ZERO);
        assert_eq!(backoff.next_backoff(), Duration::ZERO);
    }
}
