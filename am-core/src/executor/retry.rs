//! Bounded exponential backoff
//!
//! A small reusable policy object (max attempts, base delay, factor) so
//! executor logic stays testable with an injected sleep.

use std::time::Duration;

use tracing::debug;

use crate::data::config::RetrySettings;
use crate::error::Result;

/// Delay schedule for retrying a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, factor: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            factor,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
            settings.factor,
        )
    }

    /// Delay before retry number `retry` (1-based): base * factor^(retry-1)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(exponent))
    }

    /// The full delay sequence between attempts
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|retry| self.delay_for(retry))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Sleep function injected into the executor; tests pass a no-op
pub type SleepFn = Box<dyn Fn(Duration) + Send + Sync>;

/// Run `op` until it succeeds, fails terminally, or exhausts the policy.
/// Only transient errors (see `AdbmendError::is_transient`) are retried.
pub fn run_with_retry<T>(
    policy: &RetryPolicy,
    sleep: &SleepFn,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient failure, backing off");
                sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdbmendError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_delay_sequence() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn transient_failures_retry_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 2);
        let slept = Arc::new(AtomicU32::new(0));
        let slept_in = slept.clone();
        let sleep: SleepFn = Box::new(move |_| {
            slept_in.fetch_add(1, Ordering::SeqCst);
        });

        let attempts = AtomicU32::new(0);
        let result = run_with_retry(&policy, &sleep, || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AdbmendError::StoreConnection("refused".to_string()))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(slept.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn terminal_errors_do_not_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 2);
        let sleep: SleepFn = Box::new(|_| panic!("must not sleep on terminal errors"));

        let attempts = AtomicU32::new(0);
        let result: Result<()> = run_with_retry(&policy, &sleep, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(AdbmendError::DeviceNotFound("1-2.3".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhaustion_returns_the_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 2);
        let sleep: SleepFn = Box::new(|_| {});

        let attempts = AtomicU32::new(0);
        let result: Result<()> = run_with_retry(&policy, &sleep, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(AdbmendError::Timeout("store".to_string()))
        });

        assert!(matches!(result, Err(AdbmendError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
