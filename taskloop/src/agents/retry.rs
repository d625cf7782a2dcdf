//! Transient-fault retry for collaborator calls: exponential backoff, cancellable.

use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::CallError;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Retry policy for one collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Backoff multiplier applied for each further attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before `attempt` (1-indexed). The first attempt never waits.
    ///
    /// With the default policy: attempt 2 waits 2s, attempt 3 waits 4s.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * self.multiplier.powi(exponent))
    }
}

/// Run `call` until it succeeds or the policy is used up.
///
/// Cancellation is never retried: a cancelled call or a cancelled backoff
/// sleep returns immediately.
pub fn call_with_retry<F>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut call: F,
) -> Result<String, CallError>
where
    F: FnMut() -> Result<String, CallError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last = None;
    for attempt in 1..=max_attempts {
        sleep_cancellable(cancel, policy.delay_before(attempt))?;
        match call() {
            Ok(text) => return Ok(text),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!(attempt, max_attempts, err = %err, "call failed");
                last = Some(err);
            }
        }
    }
    Err(CallError::RetriesExhausted {
        attempts: max_attempts,
        last: Box::new(last.unwrap_or(CallError::EmptyResponse)),
    })
}

/// Sleep for `duration`, waking early with [`CallError::Cancelled`] when `cancel` fires.
pub fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> Result<(), CallError> {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        thread::sleep(remaining.min(SLEEP_SLICE));
    }
}
