//! Exponential reconnect backoff for mesh links (§4.5).
//!
//! A stateless doubling counter: mesh reconnects don't need the
//! sliding-window rate limiting a supervised process restart would, since
//! a mesh peer is always worth retrying and there is no "give up and
//! escalate" step (§4.5 "reconnect indefinitely").

// Layer 1: Standard library imports
use std::time::Duration;

/// Tracks the current delay for one peer's reconnect attempts.
///
/// `next_delay()` doubles the delay on each call up to `max`, following a
/// `base * 2^min(count, 10)` curve; `reset()` is called after a successful
/// connection so the next failure starts cold again.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    /// Delay to wait before the next attempt, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let capped_attempt = self.attempt.min(10);
        let multiplier = 2u64.saturating_pow(capped_attempt);
        let delay_ms = (self.base.as_millis() as u64).saturating_mul(multiplier);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay_ms).min(self.max)
    }

    /// Reset the attempt counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_equals_base() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(200), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    }

    #[test]
    fn delay_doubles_each_attempt() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn reset_returns_to_base_delay() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
