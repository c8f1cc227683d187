use rand::{Rng, SeedableRng};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

/// Jitter strategy applied on top of a computed backoff delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Jitter {
    /// No jitter: always the nominal delay.
    None,
    /// Uniformly pick between half the nominal delay and the full delay.
    Half,
    /// Uniformly pick between zero and the full delay.
    Full,
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay_seconds` (always >= 1, per backend granularity).
    Retry { delay_seconds: u32 },
    /// Give up; surface the error as a terminal failure.
    Fail,
}

/// Decides whether a failed attempt should retry and with what delay.
///
/// Pure and side-effect-free: `decide` takes the PRNG seed it needs for
/// jitter as an explicit argument rather than reading the wall clock or a
/// thread-local RNG, so the same `(error, attempt, jitter_seed)` always
/// yields the same decision.
pub trait RetryPolicy: Send + Sync {
    /// `attempt_number` is zero-based: the number of failures already
    /// recorded for this operation.
    fn decide(&self, error: &ExecutionError, attempt_number: u32, jitter_seed: u64) -> RetryDecision;
}

/// Never retries; every failure is terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn decide(&self, _error: &ExecutionError, _attempt_number: u32, _jitter_seed: u64) -> RetryDecision {
        RetryDecision::Fail
    }
}

/// Always retries up to `max_attempts` with a constant delay.
#[derive(Clone, Copy, Debug)]
pub struct FixedDelay {
    pub max_attempts: u32,
    pub delay_seconds: u32,
}

impl RetryPolicy for FixedDelay {
    fn decide(&self, _error: &ExecutionError, attempt_number: u32, _jitter_seed: u64) -> RetryDecision {
        if attempt_number + 1 >= self.max_attempts {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry {
            delay_seconds: self.delay_seconds.max(1),
        }
    }
}

/// Exponential backoff with optional jitter. The library's default preset
/// for steps that don't configure a policy explicitly.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialBackoff {
    pub max_attempts: u32,
    pub base_delay_seconds: u32,
    pub max_delay_seconds: u32,
    pub jitter: Jitter,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_seconds: 1,
            max_delay_seconds: 3600,
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, _error: &ExecutionError, attempt_number: u32, jitter_seed: u64) -> RetryDecision {
        if attempt_number + 1 >= self.max_attempts {
            return RetryDecision::Fail;
        }

        let exp = 2u64.saturating_pow(attempt_number);
        let nominal = (self.base_delay_seconds as u64).saturating_mul(exp);
        let capped = nominal.min(self.max_delay_seconds as u64);

        let mut rng = SmallRng::seed_from_u64(jitter_seed);
        let delay = match self.jitter {
            Jitter::None => capped,
            Jitter::Half => {
                let floor = capped / 2;
                if capped > floor {
                    rng.random_range(floor..=capped)
                } else {
                    capped
                }
            }
            Jitter::Full => {
                if capped > 0 {
                    rng.random_range(0..=capped)
                } else {
                    0
                }
            }
        };

        RetryDecision::Retry {
            delay_seconds: delay.max(1) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn err() -> ExecutionError {
        ExecutionError::new(ErrorKind::UserError, "boom")
    }

    #[test]
    fn no_retry_always_fails() {
        assert_eq!(NoRetry.decide(&err(), 0, 1), RetryDecision::Fail);
        assert_eq!(NoRetry.decide(&err(), 10, 1), RetryDecision::Fail);
    }

    #[test]
    fn fixed_delay_exhausts_after_max_attempts() {
        let policy = FixedDelay {
            max_attempts: 3,
            delay_seconds: 2,
        };
        assert_eq!(
            policy.decide(&err(), 0, 1),
            RetryDecision::Retry { delay_seconds: 2 }
        );
        assert_eq!(
            policy.decide(&err(), 1, 1),
            RetryDecision::Retry { delay_seconds: 2 }
        );
        assert_eq!(policy.decide(&err(), 2, 1), RetryDecision::Fail);
    }

    #[test]
    fn exponential_backoff_delays_never_drop_below_one_second() {
        let policy = ExponentialBackoff {
            jitter: Jitter::Full,
            ..Default::default()
        };
        for attempt in 0..policy.max_attempts - 1 {
            for seed in 0..20 {
                match policy.decide(&err(), attempt, seed) {
                    RetryDecision::Retry { delay_seconds } => assert!(delay_seconds >= 1),
                    RetryDecision::Fail => panic!("unexpected fail before exhaustion"),
                }
            }
        }
    }

    #[test]
    fn exponential_backoff_is_deterministic_given_same_seed() {
        let policy = ExponentialBackoff::default();
        let a = policy.decide(&err(), 2, 42);
        let b = policy.decide(&err(), 2, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn exponential_backoff_respects_max_delay_cap() {
        let policy = ExponentialBackoff {
            max_attempts: 20,
            base_delay_seconds: 1,
            max_delay_seconds: 10,
            jitter: Jitter::None,
        };
        match policy.decide(&err(), 15, 1) {
            RetryDecision::Retry { delay_seconds } => assert_eq!(delay_seconds, 10),
            RetryDecision::Fail => panic!("expected retry"),
        }
    }
}
