//! Reconnect delays for the session loop.
//!
//! Exponential backoff with symmetric jitter and a ceiling:
//! `min(max_delay, base_delay * 2^attempt) * (1 ± jitter_factor)`.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0–1.0; 0.2 means ±20% around the exponential value.
    pub jitter_factor: f64,
    /// Give up after this many failed attempts in a row. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_consecutive_failures: None,
        }
    }
}

impl ReconnectPolicy {
    /// No waiting at all. Used by tests and for "reconnect immediately" setups.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
            max_consecutive_failures: None,
        }
    }

    /// Delay before retry number `attempt` (zero-based) with a random draw from the thread RNG.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_with_random(attempt, rand::random::<f64>())
    }

    /// Delay for `attempt` given `random` in `[0.0, 1.0)`.
    ///
    /// `random = 0.5` yields the un-jittered value.
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        let exponential = self.base_delay.saturating_mul(factor);
        let capped = exponential.min(self.max_delay);

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let scale = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter;
        capped.mul_f64(scale.max(0.0))
    }

    pub fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|max| consecutive_failures >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter_factor: jitter,
            max_consecutive_failures: None,
        }
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let p = policy(0.0);
        let delays: Vec<u128> = (0..6)
            .map(|a| p.delay_with_random(a, 0.5).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn huge_attempts_stay_at_ceiling() {
        let p = policy(0.0);
        assert_eq!(p.delay_with_random(500, 0.5), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy(0.2);
        let low = p.delay_with_random(1, 0.0).as_millis();
        let high = p.delay_with_random(1, 0.999_999).as_millis();
        assert_eq!(low, 160);
        assert!((239..=240).contains(&high), "got {high}");

        for _ in 0..100 {
            let d = p.next_delay(2).as_millis();
            assert!((320..=480).contains(&d), "got {d}");
        }
    }

    #[test]
    fn exhaustion_only_with_a_ceiling() {
        assert!(!policy(0.0).exhausted(u32::MAX));

        let bounded = ReconnectPolicy {
            max_consecutive_failures: Some(3),
            ..policy(0.0)
        };
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));
    }
}
