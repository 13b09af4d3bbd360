//! Reconnect delays.

use std::time::Duration;

/// Bounded exponential back-off.
///
/// Delays run `base`, `base * factor`, ... capped at `max`. With a `limit`
/// set, [`Backoff::next_delay`] returns `None` once that many attempts have
/// been spent. [`Backoff::reset`] starts over after a successful connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    factor: u32,
    max: Duration,
    limit: Option<u32>,
    attempts: u32,
    current: Duration,
}

impl Default for Backoff {
    /// 1s doubling up to 30s, retrying forever.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2, Duration::from_secs(30), None)
    }
}

impl Backoff {
    /// A back-off with explicit parameters. A zero `factor` is treated as 1.
    pub fn new(base: Duration, factor: u32, max: Duration, limit: Option<u32>) -> Self {
        let base = base.min(max);
        Self {
            base,
            factor: factor.max(1),
            max,
            limit,
            attempts: 0,
            current: base,
        }
    }

    /// Give up after `limit` attempts.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Delay before the next attempt, or `None` when the limit is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.limit.is_some_and(|limit| self.attempts >= limit) {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.current;
        self.current = self.current.saturating_mul(self.factor).min(self.max);
        Some(delay)
    }

    /// Attempts made since the last reset.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over from `base`.
    pub const fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..7)
            .filter_map(|_| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn limit_stops_retries() {
        let mut backoff = Backoff::default().with_limit(2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 2);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::default().with_limit(3);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }
}
