//! Retry with bounded exponential backoff.

use chrono::{DateTime, Utc};
use pulse_proto::{AgentError, ErrorKind};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One attempt within a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// The terminal result of a retried operation plus its attempt history.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, AgentError>,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> RetryOutcome<T> {
    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        (self.attempts.len() as u32).saturating_sub(1)
    }
}

/// Decides whether and when a failed attempt is re-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry `n` (0-based): `min(base * 2^n, max)`.
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = 1u32.checked_shl(n).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether `error` on `attempt` (1-based) warrants another attempt.
    ///
    /// A buffer overflow is retried once per call; a second one means the
    /// agent reliably produces too much output.
    pub fn should_retry(&self, error: &AgentError, attempt: u32, overflow_seen: bool) -> bool {
        if attempt >= self.max_attempts() {
            return false;
        }
        match error.kind() {
            ErrorKind::BufferOverflow => !overflow_seen,
            kind => kind.is_retryable(),
        }
    }

    /// Runs `operation` until it succeeds, fails terminally or attempts run
    /// out. The closure receives the 1-based attempt number.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempts = Vec::new();
        let mut overflow_seen = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started_at = Utc::now();
            let started = Instant::now();

            let result = operation(attempt).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let error = match result {
                Ok(value) => {
                    attempts.push(AttemptRecord {
                        attempt_number: attempt,
                        started_at,
                        duration_ms,
                        outcome: AttemptOutcome::Success,
                        error_kind: None,
                    });
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(error) => error,
            };

            attempts.push(AttemptRecord {
                attempt_number: attempt,
                started_at,
                duration_ms,
                outcome: AttemptOutcome::Failure,
                error_kind: Some(error.kind()),
            });

            if !self.should_retry(&error, attempt, overflow_seen) {
                debug!(
                    attempt,
                    error_kind = %error.kind(),
                    "Attempt failed, not retrying"
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }
            if error.kind() == ErrorKind::BufferOverflow {
                overflow_seen = true;
            }

            let delay = self.delay_for(attempt - 1);
            warn!(
                attempt,
                max_attempts = self.max_attempts(),
                error_kind = %error.kind(),
                delay_ms = delay.as_millis() as u64,
                "Retryable error: {}",
                error
            );
            tokio::time::sleep(delay).await;
        }
    }
}
