//! Threshold alerts raised from call metrics.
//!
//! Rules are checked after every completed call. A rule whose condition holds
//! fires at most once per cooldown; each firing is logged at WARN with the
//! metrics that triggered it and kept in a bounded history.

use crate::circuit_breaker::CircuitState;
use crate::health::HealthThresholds;
use crate::metrics::MetricsSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Fired alerts kept for inspection.
pub const MAX_ALERT_HISTORY: usize = 100;

/// Requests needed before the error-rate rule can fire.
pub const DEFAULT_ALERT_MIN_REQUESTS: u64 = 10;

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    HighErrorRate,
    CircuitOpen,
    HighLatency,
    HighRateLimitedShare,
}

impl AlertRule {
    pub const ALL: [Self; 4] = [
        Self::HighErrorRate,
        Self::CircuitOpen,
        Self::HighLatency,
        Self::HighRateLimitedShare,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::HighErrorRate => "high_error_rate",
            Self::CircuitOpen => "circuit_breaker_open",
            Self::HighLatency => "high_latency",
            Self::HighRateLimitedShare => "rate_limited_share",
        }
    }

    pub fn severity(self) -> AlertSeverity {
        match self {
            Self::HighErrorRate => AlertSeverity::High,
            Self::CircuitOpen => AlertSeverity::Critical,
            Self::HighLatency => AlertSeverity::Medium,
            Self::HighRateLimitedShare => AlertSeverity::Low,
        }
    }

    /// Minimum time between two firings of this rule.
    pub fn cooldown(self) -> Duration {
        match self {
            Self::HighErrorRate => MINUTE * 5,
            Self::CircuitOpen => MINUTE,
            Self::HighLatency => MINUTE * 3,
            Self::HighRateLimitedShare => MINUTE * 10,
        }
    }

    fn message(self, metrics: &MetricsSnapshot, limits: &HealthThresholds) -> String {
        match self {
            Self::HighErrorRate => format!(
                "Error rate {:.1}% exceeds {:.0}%",
                metrics.error_rate() * 100.0,
                limits.critical_error_rate * 100.0
            ),
            Self::CircuitOpen => "Circuit breaker is OPEN, agent unavailable".to_string(),
            Self::HighLatency => format!(
                "p95 latency {}ms exceeds {}ms",
                metrics.latency.p95_ms, limits.p95_latency_ms
            ),
            Self::HighRateLimitedShare => format!(
                "Rate limiting delayed {:.1}% of requests",
                metrics.rate_limited_ratio() * 100.0
            ),
        }
    }
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub rule: AlertRule,
    pub severity: AlertSeverity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub circuit_state: CircuitState,
}

#[derive(Debug, Default)]
struct AlertState {
    last_fired: HashMap<AlertRule, Instant>,
    history: VecDeque<Alert>,
}

/// Evaluates the alert rules and enforces their cooldowns.
#[derive(Debug)]
pub struct AlertManager {
    thresholds: HealthThresholds,
    min_requests: u64,
    state: Mutex<AlertState>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

impl AlertManager {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            min_requests: DEFAULT_ALERT_MIN_REQUESTS,
            state: Mutex::new(AlertState::default()),
        }
    }

    /// The error-rate rule stays quiet until more than `min_requests` calls completed.
    pub fn with_min_requests(mut self, min_requests: u64) -> Self {
        self.min_requests = min_requests;
        self
    }

    fn lock(&self) -> MutexGuard<'_, AlertState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_triggered(
        &self,
        rule: AlertRule,
        metrics: &MetricsSnapshot,
        circuit_state: CircuitState,
    ) -> bool {
        let limits = &self.thresholds;
        match rule {
            AlertRule::HighErrorRate => {
                metrics.total_requests > self.min_requests
                    && metrics.error_rate() > limits.critical_error_rate
            }
            AlertRule::CircuitOpen => circuit_state == CircuitState::Open,
            AlertRule::HighLatency => metrics.latency.p95_ms > limits.p95_latency_ms,
            AlertRule::HighRateLimitedShare => {
                metrics.rate_limited_ratio() > limits.rate_limited_ratio
            }
        }
    }

    /// Fires every rule whose condition holds and whose cooldown has passed.
    pub fn check(&self, metrics: &MetricsSnapshot, circuit_state: CircuitState) -> Vec<Alert> {
        let now = Instant::now();
        let mut state = self.lock();
        let mut fired = Vec::new();

        for rule in AlertRule::ALL {
            if !self.is_triggered(rule, metrics, circuit_state) {
                continue;
            }
            let cooling = state
                .last_fired
                .get(&rule)
                .is_some_and(|last| now.duration_since(*last) < rule.cooldown());
            if cooling {
                continue;
            }
            state.last_fired.insert(rule, now);

            let alert = Alert {
                rule,
                severity: rule.severity(),
                message: rule.message(metrics, &self.thresholds),
                triggered_at: Utc::now(),
                circuit_state,
            };
            warn!(
                alert = rule.id(),
                severity = %alert.severity,
                total_requests = metrics.total_requests,
                error_rate = metrics.error_rate(),
                p95_ms = metrics.latency.p95_ms,
                rate_limited_ratio = metrics.rate_limited_ratio(),
                circuit_state = %circuit_state,
                "ALERT: {}",
                alert.message
            );

            if state.history.len() == MAX_ALERT_HISTORY {
                state.history.pop_front();
            }
            state.history.push_back(alert.clone());
            fired.push(alert);
        }

        fired
    }

    /// Fired alerts, oldest first.
    pub fn history(&self) -> Vec<Alert> {
        self.lock().history.iter().cloned().collect()
    }
}
