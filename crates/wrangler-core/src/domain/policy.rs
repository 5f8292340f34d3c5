//! Task policies: group, priority, retry and debounce.
//!
//! Policies are small value objects returned by a task, so each one can be
//! built and tested on its own.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Base delay of the default exponential backoff.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(30);

/// Scheduler group a task's jobs are filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group(String);

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Scheduler priority. Lower values run first among jobs due at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority(u8::MAX);
    pub const DEFAULT: Priority = Priority(10);

    /// Clamp an arbitrary value into the supported range.
    pub fn new(value: i64) -> Self {
        Self(value.clamp(0, i64::from(u8::MAX)) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// How the delay before the next attempt grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^(current_try - 1)`
    Exponential { base: Duration },
    /// Same delay before every retry.
    Fixed(Duration),
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: DEFAULT_RETRY_BASE,
        }
    }
}

/// Retry policy for failed tasks.
///
/// `max_retries`:
/// - `0`: not retryable
/// - negative: retry indefinitely
/// - `N > 0`: up to N retries (N + 1 attempts in total)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    max_retries: i32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn limited(max_retries: u16) -> Self {
        Self {
            max_retries: i32::from(max_retries),
            backoff: Backoff::default(),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            max_retries: -1,
            backoff: Backoff::default(),
        }
    }

    /// Build from a raw `max_retries` value with the semantics above.
    pub fn with_max_retries(max_retries: i32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn is_retryable(&self) -> bool {
        self.max_retries != 0
    }

    /// Whether a task whose `current_try` retries have already been
    /// scheduled may be retried once more.
    pub fn should_retry(&self, current_try: u32) -> bool {
        if self.max_retries < 0 {
            return true;
        }
        current_try < self.max_retries as u32
    }

    /// Delay before attempt number `current_try` (1-indexed retry count).
    ///
    /// With the default policy:
    /// - try 1: 30s
    /// - try 2: 60s
    /// - try 3: 120s
    /// - try 4: 240s
    pub fn retry_delay(&self, current_try: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base } => {
                let exponent = current_try.saturating_sub(1).min(31);
                base.saturating_mul(1u32 << exponent)
            }
        }
    }
}

/// Debounce policy: extra delay applied to the live instance when a
/// duplicate dispatch arrives. Never applied to retry scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebouncePolicy {
    delay: Option<Duration>,
}

impl DebouncePolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn after(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }

    pub fn is_debouncable(&self) -> bool {
        self.delay.is_some()
    }

    pub fn debounce_delay(&self) -> Duration {
        self.delay.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 30)]
    #[case(2, 60)]
    #[case(3, 120)]
    #[case(4, 240)]
    fn default_backoff_doubles_from_thirty_seconds(#[case] current_try: u32, #[case] secs: u64) {
        let policy = RetryPolicy::limited(5);
        assert_eq!(policy.retry_delay(current_try), Duration::from_secs(secs));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::unlimited();
        let huge = policy.retry_delay(u32::MAX);
        assert!(huge >= policy.retry_delay(31));
    }

    #[test]
    fn fixed_backoff_ignores_try_count() {
        let policy = RetryPolicy::limited(3).with_backoff(Backoff::Fixed(Duration::from_secs(5)));
        assert_eq!(policy.retry_delay(1), Duration::from_secs(5));
        assert_eq!(policy.retry_delay(3), Duration::from_secs(5));
    }

    #[rstest]
    #[case(RetryPolicy::none(), 0, false)]
    #[case(RetryPolicy::limited(2), 0, true)]
    #[case(RetryPolicy::limited(2), 1, true)]
    #[case(RetryPolicy::limited(2), 2, false)]
    #[case(RetryPolicy::unlimited(), 10_000, true)]
    fn should_retry_respects_budget(
        #[case] policy: RetryPolicy,
        #[case] current_try: u32,
        #[case] expected: bool,
    ) {
        assert_eq!(policy.should_retry(current_try), expected);
    }

    #[test]
    fn priority_is_clamped() {
        assert_eq!(Priority::new(-5), Priority::MIN);
        assert_eq!(Priority::new(1_000), Priority::MAX);
        assert_eq!(Priority::new(42).value(), 42);
        assert_eq!(Priority::default(), Priority::DEFAULT);
    }

    #[test]
    fn debounce_policy_defaults_to_disabled() {
        assert!(!DebouncePolicy::default().is_debouncable());
        let policy = DebouncePolicy::after(Duration::from_secs(10));
        assert!(policy.is_debouncable());
        assert_eq!(policy.debounce_delay(), Duration::from_secs(10));
    }
}
