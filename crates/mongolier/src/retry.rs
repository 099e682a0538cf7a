//! Bounded retry of operations that hit the auto-reconnect condition
//!
//! A single combinator, [`RetryPolicy::run`], wraps one delegate call. It is
//! generic over the operation and its error type so every collection method
//! shares the same loop.

use mongolier_common::Reconnectable;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Whether an operation can safely be issued more than once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Reads and commands with no side effects
    Read,
    /// Writes that converge to the same state when repeated (upsert by `_id`,
    /// insert with a client-assigned `_id`, index creation)
    IdempotentWrite,
    /// Writes whose effect may compound when repeated (`$inc`, `$push`,
    /// deletes by non-unique filter)
    Write,
}

/// Retry policy for the auto-reconnect condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts for one logical operation (the retry ceiling)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
    /// Also retry non-idempotent writes
    pub retry_writes: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            retry_writes: false,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            retry_writes: false,
        }
    }

    /// Creates a policy with a fixed delay between attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            retry_writes: false,
        }
    }

    /// Sets whether non-idempotent writes are retried
    pub fn with_retry_writes(mut self, retry_writes: bool) -> Self {
        self.retry_writes = retry_writes;
        self
    }

    /// Number of attempts allowed for an operation of the given kind
    pub fn attempts_for(&self, kind: OperationKind) -> u32 {
        let ceiling = self.max_attempts.max(1);
        match kind {
            OperationKind::Read | OperationKind::IdempotentWrite => ceiling,
            OperationKind::Write if self.retry_writes => ceiling,
            OperationKind::Write => 1,
        }
    }

    /// Delay to wait after the given failed attempt (1-indexed)
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let max_delay = self.max_delay.as_secs_f64();
        let delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        if !delay.is_finite() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay.clamp(0.0, max_delay))
    }

    /// Runs `operation`, re-issuing it while it fails with the auto-reconnect
    /// condition and attempts remain.
    ///
    /// The last transient error is returned unchanged once the ceiling is hit.
    /// Any other error is returned after the attempt that produced it.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation_name: &str,
        kind: OperationKind,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Reconnectable + Display,
    {
        let max_attempts = self.attempts_for(kind);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt = attempt,
                            "Operation succeeded after reconnect"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_auto_reconnect() && attempt < max_attempts => {
                    let delay = self.delay_after_attempt(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "AutoReconnect, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    if err.is_auto_reconnect() {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %err,
                            "AutoReconnect, giving up"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum SimulatedError {
        AutoReconnect(u32),
        InvalidOperator,
    }

    impl Display for SimulatedError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                SimulatedError::AutoReconnect(n) => write!(f, "AutoReconnect #{}", n),
                SimulatedError::InvalidOperator => write!(f, "unknown operator: $bogus"),
            }
        }
    }

    impl Reconnectable for SimulatedError {
        fn is_auto_reconnect(&self) -> bool {
            matches!(self, SimulatedError::AutoReconnect(_))
        }
    }

    /// Simulated driver call that fails with AutoReconnect `failures` times
    /// and then succeeds.
    async fn flaky(calls: &AtomicU32, failures: u32) -> Result<&'static str, SimulatedError> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            Err(SimulatedError::AutoReconnect(n))
        } else {
            Ok("ok")
        }
    }

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::ZERO)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(!policy.retry_writes);
        assert_eq!(policy.attempts_for(OperationKind::Read), 3);
        assert_eq!(policy.attempts_for(OperationKind::IdempotentWrite), 3);
        assert_eq!(policy.attempts_for(OperationKind::Write), 1);
    }

    #[test]
    fn test_retry_writes_opt_in() {
        let policy = RetryPolicy::default().with_retry_writes(true);
        assert_eq!(policy.attempts_for(OperationKind::Write), 3);
    }

    #[test]
    fn test_zero_attempts_still_calls_once() {
        let policy = instant(0);
        assert_eq!(policy.attempts_for(OperationKind::Read), 1);
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(250));
        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            retry_writes: false,
        };
        assert_eq!(policy.delay_after_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_after_attempt(1).as_millis(), 100);
        assert_eq!(policy.delay_after_attempt(2).as_millis(), 200);
        assert_eq!(policy.delay_after_attempt(3).as_millis(), 400);
        assert_eq!(policy.delay_after_attempt(4).as_millis(), 500);
    }

    #[test]
    fn test_bad_multiplier_never_yields_invalid_delay() {
        let mut policy = RetryPolicy::default();

        policy.backoff_multiplier = -2.0;
        assert_eq!(policy.delay_after_attempt(1).as_millis(), 100);
        assert_eq!(policy.delay_after_attempt(2), Duration::ZERO);
        assert_eq!(policy.delay_after_attempt(3).as_millis(), 400);

        policy.backoff_multiplier = f64::NAN;
        assert_eq!(policy.delay_after_attempt(2), policy.max_delay);

        policy.backoff_multiplier = f64::INFINITY;
        assert_eq!(policy.delay_after_attempt(2), policy.max_delay);
    }

    #[tokio::test]
    async fn test_two_reconnects_then_success_makes_three_calls() {
        let calls = AtomicU32::new(0);
        let result = instant(3)
            .run("find", OperationKind::Read, || flaky(&calls, 2))
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ceiling_reached_returns_last_transient_error() {
        let calls = AtomicU32::new(0);
        let result = instant(3)
            .run("find", OperationKind::Read, || flaky(&calls, 3))
            .await;

        assert_eq!(result, Err(SimulatedError::AutoReconnect(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_attempts_beyond_ceiling() {
        let calls = AtomicU32::new(0);
        let result = instant(3)
            .run("count", OperationKind::Read, || flaky(&calls, 10))
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = instant(3)
            .run("find", OperationKind::Read, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SimulatedError::InvalidOperator) }
            })
            .await;

        assert_eq!(result, Err(SimulatedError::InvalidOperator));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plain_write_is_attempted_once() {
        let calls = AtomicU32::new(0);
        let result = instant(3)
            .run("update_one", OperationKind::Write, || flaky(&calls, 1))
            .await;

        assert_eq!(result, Err(SimulatedError::AutoReconnect(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idempotent_write_is_retried() {
        let calls = AtomicU32::new(0);
        let result = instant(3)
            .run("replace_one", OperationKind::IdempotentWrite, || flaky(&calls, 1))
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_try_success_makes_one_call() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run("find", OperationKind::Read, || flaky(&calls, 0))
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result = policy
            .run("find", OperationKind::Read, || flaky(&calls, 2))
            .await;

        assert_eq!(result, Ok("ok"));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
