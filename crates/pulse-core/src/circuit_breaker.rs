//! Consecutive-failure circuit breaker.
//!
//! State machine:
//!
//! ```text
//!  CLOSED --(failure_threshold consecutive failures)--> OPEN
//!  OPEN   --(reset_timeout since last failure)--------> HALF_OPEN
//!  HALF_OPEN --(trial success)--> CLOSED
//!  HALF_OPEN --(trial failure)--> OPEN
//! ```
//!
//! All transitions happen under one lock, so concurrent callers observe them
//! in a single order.

use crate::config::CircuitBreakerConfig;
use pulse_proto::{AgentError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    #[default]
    Closed,
    /// Calls fail fast without reaching the agent.
    Open,
    /// A limited number of trial calls probe for recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge value for exposition: 0 closed, 1 half-open, 2 open.
    pub fn gauge(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change caused by an admission check or a recorded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl Transition {
    /// Whether this transition opened the circuit.
    pub fn is_trip(&self) -> bool {
        self.to == CircuitState::Open
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_trials_used: u32,
    /// Time since the most recent counted failure.
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    half_open_trials_used: u32,
}

impl BreakerState {
    fn move_to(&mut self, to: CircuitState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(Transition { from, to })
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission check, called before every attempt.
    ///
    /// Returns [`AgentError::CircuitOpen`] when the call must fail fast. An
    /// OPEN circuit whose reset timeout has elapsed moves to HALF_OPEN and the
    /// caller becomes its first trial.
    pub fn try_acquire(&self) -> Result<Option<Transition>, AgentError> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .is_none_or(|at| at.elapsed() >= self.config.reset_timeout());
                if !cooled_down {
                    return Err(AgentError::CircuitOpen);
                }
                inner.half_open_trials_used = 1;
                let transition = inner.move_to(CircuitState::HalfOpen);
                info!("Circuit breaker HALF_OPEN: admitting trial call");
                Ok(transition)
            }
            CircuitState::HalfOpen => {
                if inner.half_open_trials_used >= self.config.half_open_max_trials {
                    return Err(AgentError::CircuitOpen);
                }
                inner.half_open_trials_used += 1;
                Ok(None)
            }
        }
    }

    /// Records a successful attempt.
    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
                inner.half_open_trials_used = 0;
                info!("Circuit breaker CLOSED: trial call succeeded");
                inner.move_to(CircuitState::Closed)
            }
            // A straggler admitted before the circuit opened; the cool-down
            // still has to run its course.
            CircuitState::Open => None,
        }
    }

    /// Records a failed attempt of the given kind.
    ///
    /// `CircuitOpen` is never counted, and `BufferOverflow` only when
    /// `count_buffer_overflow` is set.
    pub fn record_failure(&self, kind: ErrorKind) -> Option<Transition> {
        let counted = match kind {
            ErrorKind::CircuitOpen => false,
            ErrorKind::BufferOverflow => self.config.count_buffer_overflow,
            _ => true,
        };

        let mut inner = self.lock();

        if !counted {
            // Give the trial slot back so the half-open probe is not lost.
            if inner.state == CircuitState::HalfOpen {
                inner.half_open_trials_used = inner.half_open_trials_used.saturating_sub(1);
            }
            return None;
        }

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    consecutive_failures = inner.consecutive_failures,
                    error_kind = %kind,
                    "Circuit breaker OPEN"
                );
                inner.move_to(CircuitState::Open)
            }
            CircuitState::HalfOpen => {
                inner.half_open_trials_used = 0;
                warn!(error_kind = %kind, "Circuit breaker re-OPENED: trial call failed");
                inner.move_to(CircuitState::Open)
            }
            _ => None,
        }
    }

    /// Current state, without applying the reset timeout.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_trials_used: inner.half_open_trials_used,
            since_last_failure: inner.last_failure_at.map(|at| at.elapsed()),
        }
    }

    /// Forces the breaker back to CLOSED with cleared counters.
    pub fn reset(&self) -> Option<Transition> {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
        inner.half_open_trials_used = 0;
        inner.move_to(CircuitState::Closed)
    }
}
