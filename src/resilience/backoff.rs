//! Delays between connect attempts.

use std::time::Duration;

use rand::Rng;

/// Doubling delay schedule with up to 10% jitter, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// No waiting at all between attempts.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Undithered delay after the `failed`-th failed attempt (1-based).
    pub fn nominal(&self, failed: u32) -> Duration {
        if failed == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failed - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay to sleep after the `failed`-th failed attempt.
    pub fn delay(&self, failed: u32) -> Duration {
        let nominal = self.nominal(failed);
        let spread = nominal.as_millis() as u64 / 10;
        if spread == 0 {
            return nominal;
        }
        nominal + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(backoff.nominal(1), Duration::from_millis(100));
        assert_eq!(backoff.nominal(2), Duration::from_millis(200));
        assert_eq!(backoff.nominal(4), Duration::from_millis(800));
        assert_eq!(backoff.nominal(5), Duration::from_millis(1000));
        assert_eq!(backoff.nominal(40), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(2000));
        for _ in 0..50 {
            let d = backoff.delay(3);
            assert!(d >= Duration::from_millis(400) && d < Duration::from_millis(440));
        }
    }

    #[test]
    fn nothing_before_first_failure() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(Backoff::none().delay(3), Duration::ZERO);
    }
}
