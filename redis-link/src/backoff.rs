//! Reconnect backoff policy
//!
//! Delays grow by a factor of 1.5 per consecutive failure, rounded to whole
//! milliseconds with ties going to the even value, and are clamped by the
//! configured ceiling. A successful connection resets the sequence.

use std::time::Duration;

const BACKOFF_EXPONENT: f64 = 1.5;

/// Tracks the current reconnect delay between connection attempts
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    initial: Duration,
    max: Option<Duration>,
    current: Option<Duration>,
}

impl ReconnectPolicy {
    pub(crate) fn new(initial: Duration, max: Option<Duration>) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    /// Whether a backoff delay is in effect, i.e. the previous connection
    /// attempt failed and has not been followed by a success.
    pub(crate) fn backing_off(&self) -> bool {
        self.current.is_some()
    }

    /// Advance to the next delay and return it.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(current) => {
                let ms = (current.as_millis() as f64 * BACKOFF_EXPONENT).round_ties_even();
                Duration::from_millis(ms as u64)
            }
        };
        let next = match self.max {
            Some(max) => next.min(max),
            None => next,
        };
        self.current = Some(next);
        next
    }

    /// Clear the delay after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(policy: &mut ReconnectPolicy, n: usize) -> Vec<u64> {
        (0..n).map(|_| policy.next_delay().as_millis() as u64).collect()
    }

    #[test]
    fn grows_by_half_and_rounds_ties_to_even() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(100), Some(Duration::from_secs(1)));
        assert_eq!(delays(&mut policy, 6), vec![100, 150, 225, 338, 507, 760]);
    }

    #[test]
    fn clamps_at_max() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(100), Some(Duration::from_secs(1)));
        let seq = delays(&mut policy, 10);
        assert_eq!(seq[6..], [1000, 1000, 1000, 1000]);
    }

    #[test]
    fn unbounded_when_max_is_none() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100), None);
        let seq = delays(&mut policy, 12);
        assert!(seq.last().copied().unwrap() > 1000);
        assert!(seq.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(100), Some(Duration::from_secs(1)));
        let _ = delays(&mut policy, 3);
        assert!(policy.backing_off());
        policy.reset();
        assert!(!policy.backing_off());
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }
}
