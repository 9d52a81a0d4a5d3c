//! Health verdict derived from metrics and circuit state.

use crate::circuit_breaker::CircuitState;
use crate::metrics::MetricsSnapshot;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// 80 and above is healthy, 50 and above degraded.
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => Self::Healthy,
            50.. => Self::Degraded,
            _ => Self::Unhealthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// 0..=100.
    pub score: u8,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub circuit_state: CircuitState,
    pub metrics: MetricsSnapshot,
}

/// Limits past which the health score is penalized.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// Error rate costing 30 points.
    pub critical_error_rate: f64,
    /// Error rate costing 15 points.
    pub elevated_error_rate: f64,
    /// p95 latency costing 20 points.
    pub p95_latency_ms: u64,
    /// Rate-limited share costing 10 points.
    pub rate_limited_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            critical_error_rate: 0.20,
            elevated_error_rate: 0.10,
            p95_latency_ms: 30_000,
            rate_limited_ratio: 0.10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, metrics: MetricsSnapshot, circuit_state: CircuitState) -> HealthReport {
        let limits = &self.thresholds;
        let mut score: i32 = 100;
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        let error_rate = metrics.error_rate();
        if error_rate > limits.critical_error_rate {
            score -= 30;
            issues.push(format!("High error rate: {:.1}%", error_rate * 100.0));
            recommendations.push("Investigate the root cause of agent failures".to_string());
        } else if error_rate > limits.elevated_error_rate {
            score -= 15;
            issues.push(format!("Elevated error rate: {:.1}%", error_rate * 100.0));
        }

        if circuit_state == CircuitState::Open {
            score -= 50;
            issues.push("Circuit breaker is OPEN".to_string());
            recommendations
                .push("Agent is unavailable: check the agent CLI and its credentials".to_string());
        }

        if metrics.latency.p95_ms > limits.p95_latency_ms {
            score -= 20;
            issues.push(format!(
                "High latency: {}ms (95th percentile)",
                metrics.latency.p95_ms
            ));
            recommendations.push("Consider raising timeout_ms or shortening prompts".to_string());
        }

        let rate_limited = metrics.rate_limited_ratio();
        if rate_limited > limits.rate_limited_ratio {
            score -= 10;
            issues.push(format!(
                "High rate-limited share: {:.1}%",
                rate_limited * 100.0
            ));
            recommendations
                .push("Consider lowering rate_limit_ms or smoothing request bursts".to_string());
        }

        let score = score.clamp(0, 100) as u8;
        HealthReport {
            status: HealthStatus::from_score(score),
            score,
            issues,
            recommendations,
            circuit_state,
            metrics,
        }
    }
}
