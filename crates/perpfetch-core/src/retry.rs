//! Retry policy and per-call retry bookkeeping for the coordinator.

use std::time::Duration;

use crate::SourceError;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `base * factor^retry`, capped at `max`, optionally jittered by +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let seconds = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let capped = Duration::from_secs_f64(seconds.max(0.0));

                if !jitter {
                    return capped;
                }

                let millis = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
                let spread = millis / 2;
                let offset = fastrand::u64(0..=spread.saturating_mul(2));
                Duration::from_millis(millis.saturating_sub(spread).saturating_add(offset))
            }
        }
    }
}

/// Attempt budget and backoff applied to transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never below 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                base,
                factor: 2.0,
                max: Duration::from_secs(5),
                jitter: true,
            },
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Retry bookkeeping for exactly one logical call.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempt: u32,
    last_error: Option<SourceError>,
    next_delay: Option<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the next attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.next_delay = None;
        self.attempt
    }

    /// Records the failure of the current attempt and decides whether to go on.
    pub fn record_failure(&mut self, error: SourceError, policy: &RetryPolicy) -> RetryDecision {
        let decision = if error.retryable() && self.attempt < policy.attempts() {
            let delay = policy.backoff.delay(self.attempt.saturating_sub(1));
            self.next_delay = Some(delay);
            RetryDecision::RetryAfter(delay)
        } else {
            RetryDecision::GiveUp
        };
        self.last_error = Some(error);
        decision
    }

    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&SourceError> {
        self.last_error.as_ref()
    }

    pub const fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    /// Final error for the call. Transient failures that used up the budget are
    /// tagged as exhausted; anything else keeps its own classification.
    pub fn into_error(self, policy: &RetryPolicy) -> Option<SourceError> {
        let attempts = self.attempt;
        self.last_error.map(|error| {
            if error.retryable() && attempts >= policy.attempts() {
                error.into_exhausted(attempts)
            } else {
                error.with_attempts(attempts)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(200));
        assert_eq!(backoff.delay(1), Duration::from_millis(400));
        assert_eq!(backoff.delay(2), Duration::from_millis(800));
        assert_eq!(backoff.delay(3), Duration::from_secs(1));
        assert_eq!(backoff.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_half_of_the_delay() {
        let backoff = Backoff::default();
        for _ in 0..20 {
            for retry in 0..6 {
                let expected = (200.0 * 2_f64.powi(retry as i32)).min(5_000.0);
                let actual = backoff.delay(retry).as_millis() as f64;
                assert!(actual >= expected * 0.5, "retry={retry} delay={actual}");
                assert!(actual <= expected * 1.5, "retry={retry} delay={actual}");
            }
        }
    }

    #[test]
    fn default_policy_allows_three_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 3);
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).attempts(), 1);
    }

    #[test]
    fn transient_failures_retry_until_budget_is_spent() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(5));
        let mut state = RetryState::new();

        for expected in 1..=2 {
            assert_eq!(state.begin_attempt(), expected);
            let decision = state.record_failure(SourceError::rate_limited("busy"), &policy);
            assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_millis(5)));
            assert_eq!(state.next_delay(), Some(Duration::from_millis(5)));
        }

        state.begin_attempt();
        let decision = state.record_failure(SourceError::rate_limited("busy"), &policy);
        assert_eq!(decision, RetryDecision::GiveUp);

        let error = state.into_error(&policy).expect("error recorded");
        assert!(error.is_exhausted());
        assert_eq!(error.attempts(), 3);
    }

    #[test]
    fn permanent_failure_gives_up_immediately() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new();

        state.begin_attempt();
        let decision = state.record_failure(SourceError::symbol_not_supported("nope"), &policy);
        assert_eq!(decision, RetryDecision::GiveUp);
        assert!(state.last_error().is_some());

        let error = state.into_error(&policy).expect("error recorded");
        assert!(!error.is_exhausted());
        assert_eq!(error.attempts(), 1);
    }
}
