//! Error taxonomy for agent invocations.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Lowercase fragments that mark a failure as an authorization, permission
/// or quota rejection.
const REJECTION_PATTERNS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "permission denied",
    "authentication",
    "invalid api key",
    "rate limit",
    "too many requests",
    "quota exceeded",
];

/// Returns true when an error message indicates authorization, permission or
/// rate-limit rejection.
pub fn is_rejection_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    REJECTION_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Errors that can terminate an agent invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent subprocess could not be started.
    #[error("failed to spawn agent `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The agent did not finish before the deadline.
    #[error("agent timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Captured output grew past the configured ceiling.
    #[error("buffer overflow: agent output exceeds {limit} bytes")]
    BufferOverflow { limit: usize },

    /// No candidate payload anywhere in the output.
    #[error("no valid JSON payload found in agent output: {0}")]
    Parse(String),

    /// The payload was not a keyed structure.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The agent answered with the prompt (or a placeholder) instead of an analysis.
    #[error("echo response detected: agent repeated the prompt")]
    EchoDetected,

    /// The circuit breaker refused the call without invoking the agent.
    #[error("circuit breaker is OPEN - request rejected")]
    CircuitOpen,

    /// Authorization, permission or rate-limit rejection reported by the agent.
    #[error("agent rejected the request: {0}")]
    Rejected(String),

    /// The agent exited unsuccessfully without producing any output.
    #[error("agent exited with code {exit_code:?} and no output: {stderr}")]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// IO error while preparing the invocation.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Builds the error for an agent that exited without stdout.
    ///
    /// stderr mentioning authorization, permissions or rate limits becomes
    /// [`AgentError::Rejected`]; anything else is a transient process failure.
    pub fn process_failure(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if is_rejection_message(&stderr) {
            Self::Rejected(stderr.trim().to_string())
        } else {
            Self::ProcessFailed { exit_code, stderr }
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::BufferOverflow { .. } => ErrorKind::BufferOverflow,
            Self::Parse(_) => ErrorKind::Parse,
            Self::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Self::EchoDetected => ErrorKind::EchoDetected,
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::ProcessFailed { .. } => ErrorKind::ProcessFailed,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Copyable classification of an [`AgentError`], used for retry decisions
/// and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Spawn,
    Timeout,
    BufferOverflow,
    Parse,
    InvalidPayload,
    EchoDetected,
    CircuitOpen,
    Rejected,
    ProcessFailed,
    Io,
}

impl ErrorKind {
    /// Retryable kinds: timeouts, overflows, parse misses and transient
    /// process or IO failures.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::BufferOverflow | Self::Parse | Self::ProcessFailed | Self::Io
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Timeout => "timeout",
            Self::BufferOverflow => "buffer_overflow",
            Self::Parse => "parse",
            Self::InvalidPayload => "invalid_payload",
            Self::EchoDetected => "echo_detected",
            Self::CircuitOpen => "circuit_open",
            Self::Rejected => "rejected",
            Self::ProcessFailed => "process_failed",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_patterns_are_case_insensitive() {
        assert!(is_rejection_message("HTTP 401 Unauthorized"));
        assert!(is_rejection_message("Rate limit exceeded, retry later"));
        assert!(is_rejection_message("Permission denied (publickey)"));
        assert!(!is_rejection_message("connection reset by peer"));
    }

    #[test]
    fn test_process_failure_classification() {
        let rejected = AgentError::process_failure(Some(1), "Error: Forbidden\n");
        assert!(matches!(rejected, AgentError::Rejected(ref msg) if msg == "Error: Forbidden"));
        assert!(!rejected.is_retryable());

        let transient = AgentError::process_failure(Some(1), "ECONNRESET");
        assert_eq!(transient.kind(), ErrorKind::ProcessFailed);
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_retry_classification() {
        assert!(AgentError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(AgentError::BufferOverflow { limit: 1 }.is_retryable());
        assert!(AgentError::Parse("empty".into()).is_retryable());
        assert!(!AgentError::EchoDetected.is_retryable());
        assert!(!AgentError::CircuitOpen.is_retryable());
        assert!(!AgentError::InvalidPayload("42".into()).is_retryable());
        let spawn = AgentError::Spawn {
            command: "missing".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!spawn.is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::BufferOverflow).unwrap();
        assert_eq!(json, "\"buffer_overflow\"");
        assert_eq!(ErrorKind::EchoDetected.to_string(), "echo_detected");
    }
}
