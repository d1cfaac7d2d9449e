use rand::Rng;
use std::time::Duration;

/// Randomization applied to backoff delays so parallel retry streams spread
/// out instead of hammering a struggling dependency in lockstep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JitterMode {
    /// Exact delays. For tests and single-consumer setups.
    None,
    /// random[0, delay].
    Full,
    /// delay/2 + random[0, delay/2]. Keeps most of the backoff while still
    /// de-synchronizing retries.
    #[default]
    Equal,
}

impl JitterMode {
    fn apply(self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
            Self::Equal => {
                let half = ms / 2;
                let jitter = if half == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=half)
                };
                Duration::from_millis(half + jitter)
            }
        }
    }
}

/// How many times a transiently failing handler is invoked and how long the
/// runtime waits between invocations. The delay before retry `n` (0-indexed)
/// is `first_delay × factor^n`, clamped to `max_delay`, then jittered.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total handler invocations before the event dead-letters.
    pub max_attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: JitterMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterMode::default(),
        }
    }
}

impl RetryPolicy {
    /// Reads `BEACON_MAX_ATTEMPTS` from the environment; the backoff curve
    /// itself is not tunable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_attempts = std::env::var("BEACON_MAX_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(defaults.max_attempts)
            .max(1);
        Self {
            max_attempts,
            ..defaults
        }
    }

    /// Delay before retry `attempt` (0-indexed). The base is derived from the
    /// attempt number alone, never from a previous jittered value, so delays
    /// cannot drift downward over time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let unclamped = self.first_delay.as_secs_f64() * self.factor.powi(exponent);

        let base = if !unclamped.is_finite() || unclamped < 0.0 || unclamped > max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(unclamped)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: JitterMode) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn attempt_zero_uses_the_first_delay() {
        assert_eq!(
            policy(JitterMode::None).delay_for(0),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn delays_grow_exponentially_without_jitter() {
        let policy = policy(JitterMode::None);
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn delays_clamp_to_the_cap() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(1),
            ..policy(JitterMode::None)
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn full_jitter_stays_within_the_base() {
        let policy = policy(JitterMode::Full);
        for attempt in 0..12 {
            let base_ms = (100.0 * 2.0f64.powi(attempt)).min(30_000.0);
            assert!(policy.delay_for(attempt as u32) <= Duration::from_millis(base_ms as u64));
        }
    }

    #[test]
    fn equal_jitter_keeps_at_least_half_the_base() {
        let policy = policy(JitterMode::Equal);
        for attempt in 0..12 {
            let base_ms = (100.0 * 2.0f64.powi(attempt)).min(30_000.0);
            let delay = policy.delay_for(attempt as u32);
            assert!(delay >= Duration::from_millis((base_ms / 2.0) as u64));
            assert!(delay <= Duration::from_millis(base_ms as u64));
        }
    }
}
