//! Reconnect backoff

use std::time::Duration;

/// Exponential reconnect delay with a ceiling
///
/// The delay starts at `initial`, doubles on every [`advance`](Backoff::advance)
/// and never exceeds `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    const FACTOR: u32 = 2;

    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    /// Delay before the next reconnect attempt
    pub fn delay(&self) -> Duration {
        self.current
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and return the next delay
    pub fn advance(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.current = self
            .current
            .checked_mul(Self::FACTOR)
            .map_or(self.max, |next| next.min(self.max));
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_delay_sequence() {
        let mut backoff = Backoff::new(ms(2_500), ms(60_000));
        let mut delays = vec![backoff.delay()];
        for _ in 0..6 {
            delays.push(backoff.advance());
        }

        assert_eq!(
            delays,
            vec![
                ms(2_500),
                ms(5_000),
                ms(10_000),
                ms(20_000),
                ms(40_000),
                ms(60_000),
                ms(60_000)
            ]
        );
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_never_exceeds_ceiling() {
        let mut backoff = Backoff::new(ms(2_500), ms(60_000));
        for _ in 0..100 {
            assert!(backoff.advance() <= ms(60_000));
        }
        assert_eq!(backoff.delay(), ms(60_000));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(ms(2_500), ms(60_000));
        backoff.advance();
        backoff.advance();
        backoff.reset();

        assert_eq!(backoff.delay(), ms(2_500));
        assert_eq!(backoff.attempts(), 0);
    }

    #[test]
    fn test_initial_clamped_to_ceiling() {
        let backoff = Backoff::new(ms(90_000), ms(60_000));
        assert_eq!(backoff.delay(), ms(60_000));
    }
}
