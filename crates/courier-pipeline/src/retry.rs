// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backoff decisions bounded by a job's remaining time.
//!
//! The remaining-time budget is absolute: a delay never exceeds it, and an
//! exhausted budget gives up without looking at the error.

use std::time::Duration;

use courier_config::model::RetryConfig;
use courier_core::SendError;

/// First non-zero step of the exponential schedule.
const FIRST_BACKOFF: Duration = Duration::from_millis(190);
const BACKOFF_FACTOR: f64 = 1.9;
const MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// What to do after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Sleep(Duration),
    GiveUp,
}

/// Computes how long a job sleeps before its next attempt.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    default_delay: Duration,
    max_delay: Duration,
}

impl RetryScheduler {
    pub fn new(default_delay: Duration, max_delay: Duration) -> Self {
        Self {
            default_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.default_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay for `error` given `time_remaining` before the job's deadline.
    pub fn compute_delay(&self, error: &SendError, time_remaining: Duration) -> RetryDecision {
        self.delay_for(error.retry_after(), time_remaining)
    }

    /// Same as [`compute_delay`](Self::compute_delay) with an explicit hint.
    ///
    /// A server-provided `retry_after` is honoured as given (up to the budget);
    /// otherwise the default delay applies, capped at the configured ceiling.
    pub fn delay_for(&self, retry_after: Option<Duration>, time_remaining: Duration) -> RetryDecision {
        if time_remaining.is_zero() {
            return RetryDecision::GiveUp;
        }
        let wanted = match retry_after {
            Some(delay) => delay,
            None => self.default_delay.min(self.max_delay),
        };
        RetryDecision::Sleep(wanted.min(time_remaining))
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Sleep before attempt number `attempt` (1-based) on the exponential schedule.
///
/// The first attempt runs immediately.
pub fn exponential_backoff(attempt: u32) -> Duration {
    let failures = attempt.saturating_sub(1);
    if failures == 0 {
        return Duration::ZERO;
    }
    let millis = FIRST_BACKOFF.as_millis() as f64 * BACKOFF_FACTOR.powi(failures.min(64) as i32 - 1);
    if !millis.is_finite() || millis >= MAX_BACKOFF.as_millis() as f64 {
        return MAX_BACKOFF;
    }
    Duration::from_millis(millis.round() as u64)
}

/// Number of attempts whose cumulative exponential backoff reaches `budget`.
pub fn max_attempts_for(budget: Duration) -> u32 {
    let mut attempts = 0u32;
    let mut total = Duration::ZERO;
    loop {
        attempts += 1;
        total += exponential_backoff(attempts);
        if total >= budget {
            return attempts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rate_limited(secs: u64) -> SendError {
        SendError::RateLimited {
            code: 429,
            retry_after: Some(Duration::from_secs(secs)),
        }
    }

    fn network() -> SendError {
        SendError::NetworkOrServer {
            code: Some(503),
            message: "unavailable".into(),
        }
    }

    #[test]
    fn exhausted_budget_gives_up_without_inspecting_error() {
        let s = RetryScheduler::default();
        assert_eq!(s.compute_delay(&rate_limited(1), Duration::ZERO), RetryDecision::GiveUp);
        assert_eq!(s.compute_delay(&network(), Duration::ZERO), RetryDecision::GiveUp);
    }

    #[test]
    fn retry_after_is_clamped_to_remaining_time() {
        let s = RetryScheduler::default();
        assert_eq!(
            s.compute_delay(&rate_limited(10), Duration::from_millis(5000)),
            RetryDecision::Sleep(Duration::from_millis(5000))
        );
        assert_eq!(
            s.compute_delay(&rate_limited(99_999), Duration::from_secs(3)),
            RetryDecision::Sleep(Duration::from_secs(3))
        );
    }

    #[test]
    fn retry_after_below_budget_is_used_as_is() {
        let s = RetryScheduler::default();
        assert_eq!(
            s.compute_delay(&rate_limited(2), Duration::from_secs(3600)),
            RetryDecision::Sleep(Duration::from_secs(2))
        );
    }

    #[test]
    fn default_delay_is_sixty_seconds() {
        let s = RetryScheduler::default();
        assert_eq!(
            s.compute_delay(&network(), Duration::from_secs(3600)),
            RetryDecision::Sleep(Duration::from_secs(60))
        );
        assert_eq!(
            s.compute_delay(&network(), Duration::from_secs(10)),
            RetryDecision::Sleep(Duration::from_secs(10))
        );
    }

    #[test]
    fn default_delay_respects_ceiling() {
        let s = RetryScheduler::new(Duration::from_secs(120), Duration::from_secs(30));
        assert_eq!(
            s.delay_for(None, Duration::from_secs(3600)),
            RetryDecision::Sleep(Duration::from_secs(30))
        );
    }

    #[test]
    fn backoff_schedule_shape() {
        assert_eq!(exponential_backoff(1), Duration::ZERO);
        assert_eq!(exponential_backoff(2), Duration::from_millis(190));
        assert_eq!(exponential_backoff(3), Duration::from_millis(361));
        assert_eq!(exponential_backoff(40), MAX_BACKOFF);
        assert_eq!(exponential_backoff(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn max_attempts_covers_budget() {
        let day = Duration::from_secs(24 * 60 * 60);
        let attempts = max_attempts_for(day);
        let total: Duration = (1..=attempts).map(exponential_backoff).sum();
        let short_of: Duration = (1..attempts).map(exponential_backoff).sum();
        assert!(total >= day);
        assert!(short_of < day);
        assert_eq!(max_attempts_for(Duration::ZERO), 1);
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_remaining(
            retry_after_secs in proptest::option::of(0u64..1_000_000),
            remaining_ms in 0u64..100_000_000,
        ) {
            let s = RetryScheduler::default();
            let remaining = Duration::from_millis(remaining_ms);
            match s.delay_for(retry_after_secs.map(Duration::from_secs), remaining) {
                RetryDecision::Sleep(d) => {
                    prop_assert!(d <= remaining);
                    prop_assert!(!remaining.is_zero());
                }
                RetryDecision::GiveUp => prop_assert!(remaining.is_zero()),
            }
        }
    }
}
