//! Escalating backoff around code-generation calls.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::heuristics::RetryableErrorKind;

#[async_trait]
/// Trait contract for `Sleeper` behavior.
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
/// Sleeps on the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Delay schedule for transient code-generation failures. The last step
/// repeats once the schedule is exhausted.
pub struct CodegenRetryPolicy {
    pub schedule: Vec<Duration>,
    /// Total attempts allowed. `None` retries transient failures forever.
    pub max_attempts: Option<usize>,
}

impl Default for CodegenRetryPolicy {
    fn default() -> Self {
        Self {
            schedule: vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(240),
            ],
            max_attempts: None,
        }
    }
}

impl CodegenRetryPolicy {
    /// Delay before retry number `retry_index` (0-based).
    pub fn delay_for_retry(&self, retry_index: usize) -> Duration {
        self.schedule
            .get(retry_index)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or_default()
    }

    fn allows_attempt(&self, attempt: usize) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

/// Runs `operation` until it succeeds, fails with an error `classify` does
/// not consider transient, or the policy's attempt ceiling is reached.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    policy: &CodegenRetryPolicy,
    sleeper: &dyn Sleeper,
    classify: C,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Option<RetryableErrorKind>,
{
    let mut attempt = 1_usize;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let Some(kind) = classify(&error) else {
            return Err(error);
        };
        let next_attempt = attempt.saturating_add(1);
        if !policy.allows_attempt(next_attempt) {
            tracing::warn!(
                attempt,
                kind = kind.label(),
                "code generation retry ceiling reached"
            );
            return Err(error);
        }
        let delay = policy.delay_for_retry(attempt - 1);
        tracing::warn!(
            attempt,
            kind = kind.label(),
            delay_secs = delay.as_secs(),
            error = %error,
            "transient code generation failure; backing off"
        );
        sleeper.sleep(delay).await;
        attempt = next_attempt;
    }
}
