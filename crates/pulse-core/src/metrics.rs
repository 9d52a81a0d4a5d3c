//! In-process metrics for agent invocations.
//!
//! Counters are updated per call; latency percentiles are computed on demand
//! from a rolling window of the most recent call latencies.

use crate::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};
use pulse_proto::ErrorKind;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Latency samples retained for percentile computation.
pub const MAX_LATENCY_SAMPLES: usize = 1000;

/// Upper bounds (seconds) of the exported latency histogram buckets.
const HISTOGRAM_BUCKETS_SECS: [u64; 4] = [1, 5, 15, 30];

/// The end-to-end summary of one `invoke` call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSummary {
    pub latency: Duration,
    /// `None` on success.
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    pub degraded: bool,
}

impl CallSummary {
    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}

/// Latency distribution over the retained samples, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl LatencyStats {
    pub fn from_samples(samples: impl IntoIterator<Item = u64>) -> Self {
        let mut sorted: Vec<u64> = samples.into_iter().collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        Self {
            samples: sorted.len(),
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            avg_ms: sum as f64 / sorted.len() as f64,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
        }
    }
}

/// Nearest-rank percentile: `sorted[ceil(n * p) - 1]`.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    let rank = (sorted.len() as f64 * p).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Successes whose result needed defaults.
    pub degraded: u64,
    pub retries: u64,
    pub circuit_trips: u64,
    /// Dispatches delayed by the rate limiter.
    pub rate_limited: u64,
    pub avg_rate_limit_wait_ms: f64,
    pub errors_by_kind: BTreeMap<ErrorKind, u64>,
    pub latency: LatencyStats,
}

impl MetricsSnapshot {
    /// Failed calls over all calls; 0 with no traffic.
    pub fn error_rate(&self) -> f64 {
        ratio(self.failures, self.total_requests)
    }

    /// Rate-limited dispatches over all calls; 0 with no traffic.
    pub fn rate_limited_ratio(&self) -> f64 {
        ratio(self.rate_limited, self.total_requests)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    successes: u64,
    failures: u64,
    degraded: u64,
    retries: u64,
    circuit_trips: u64,
    rate_limited: u64,
    rate_limit_wait: Duration,
    errors_by_kind: BTreeMap<ErrorKind, u64>,
    latencies_ms: VecDeque<u64>,
}

/// Thread-safe metrics collector shared by all in-flight calls.
#[derive(Debug, Default)]
pub struct MetricsSink {
    inner: Mutex<MetricsState>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_call(&self, summary: &CallSummary) {
        let mut state = self.lock();
        state.total_requests += 1;
        match summary.error_kind {
            None => {
                state.successes += 1;
                if summary.degraded {
                    state.degraded += 1;
                }
            }
            Some(kind) => {
                state.failures += 1;
                *state.errors_by_kind.entry(kind).or_default() += 1;
            }
        }

        if state.latencies_ms.len() == MAX_LATENCY_SAMPLES {
            state.latencies_ms.pop_front();
        }
        state
            .latencies_ms
            .push_back(summary.latency.as_millis() as u64);
    }

    pub fn record_retry(&self) {
        self.lock().retries += 1;
    }

    pub fn record_circuit_trip(&self) {
        self.lock().circuit_trips += 1;
    }

    /// Records the wait imposed by the rate limiter. Zero waits are ignored.
    pub fn record_rate_limit_wait(&self, wait: Duration) {
        if wait.is_zero() {
            return;
        }
        let mut state = self.lock();
        state.rate_limited += 1;
        state.rate_limit_wait += wait;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let avg_rate_limit_wait_ms = if state.rate_limited == 0 {
            0.0
        } else {
            state.rate_limit_wait.as_secs_f64() * 1000.0 / state.rate_limited as f64
        };

        MetricsSnapshot {
            timestamp: Utc::now(),
            total_requests: state.total_requests,
            successes: state.successes,
            failures: state.failures,
            degraded: state.degraded,
            retries: state.retries,
            circuit_trips: state.circuit_trips,
            rate_limited: state.rate_limited,
            avg_rate_limit_wait_ms,
            errors_by_kind: state.errors_by_kind.clone(),
            latency: LatencyStats::from_samples(state.latencies_ms.iter().copied()),
        }
    }

    pub fn reset(&self) {
        *self.lock() = MetricsState::default();
    }

    /// Prometheus text exposition of the current metrics.
    pub fn to_prometheus(&self, circuit: CircuitState) -> String {
        let state = self.lock();
        let (total, successes, failures, retries, rate_limited) = (
            state.total_requests,
            state.successes,
            state.failures,
            state.retries,
            state.rate_limited,
        );
        let latencies: Vec<u64> = state.latencies_ms.iter().copied().collect();
        drop(state);

        let mut out = String::new();
        counter(&mut out, "pulse_requests_total", "Total number of requests", total);
        counter(
            &mut out,
            "pulse_requests_success_total",
            "Total number of successful requests",
            successes,
        );
        counter(
            &mut out,
            "pulse_requests_failed_total",
            "Total number of failed requests",
            failures,
        );
        counter(
            &mut out,
            "pulse_requests_retries_total",
            "Total number of retries",
            retries,
        );

        let _ = writeln!(out, "# HELP pulse_request_duration_seconds Request duration in seconds");
        let _ = writeln!(out, "# TYPE pulse_request_duration_seconds histogram");
        for bound in HISTOGRAM_BUCKETS_SECS {
            let count = latencies.iter().filter(|ms| **ms <= bound * 1000).count();
            let _ = writeln!(
                out,
                "pulse_request_duration_seconds_bucket{{le=\"{bound}\"}} {count}"
            );
        }
        let _ = writeln!(
            out,
            "pulse_request_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            latencies.len()
        );
        let sum_ms: u64 = latencies.iter().sum();
        let _ = writeln!(
            out,
            "pulse_request_duration_seconds_sum {}",
            sum_ms as f64 / 1000.0
        );
        let _ = writeln!(out, "pulse_request_duration_seconds_count {}", latencies.len());

        let _ = writeln!(
            out,
            "# HELP pulse_circuit_breaker_state Circuit breaker state (0=closed, 1=half-open, 2=open)"
        );
        let _ = writeln!(out, "# TYPE pulse_circuit_breaker_state gauge");
        let _ = writeln!(out, "pulse_circuit_breaker_state {}", circuit.gauge());

        counter(
            &mut out,
            "pulse_rate_limited_total",
            "Total number of rate-limited dispatches",
            rate_limited,
        );
        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(ms: u64) -> CallSummary {
        CallSummary {
            latency: Duration::from_millis(ms),
            error_kind: None,
            attempts: 1,
            degraded: false,
        }
    }

    fn failure(kind: ErrorKind) -> CallSummary {
        CallSummary {
            latency: Duration::from_millis(10),
            error_kind: Some(kind),
            attempts: 3,
            degraded: false,
        }
    }

    #[test]
    fn test_percentiles_use_nearest_rank() {
        let stats = LatencyStats::from_samples(1..=100);
        assert_eq!(stats.min_ms, 1);
        assert_eq!(stats.max_ms, 100);
        assert_eq!(stats.p50_ms, 50);
        assert_eq!(stats.p95_ms, 95);
        assert_eq!(stats.p99_ms, 99);
        assert!((stats.avg_ms - 50.5).abs() < f64::EPSILON);

        let single = LatencyStats::from_samples([42]);
        assert_eq!(single.p50_ms, 42);
        assert_eq!(single.p99_ms, 42);

        assert_eq!(
            LatencyStats::from_samples(Vec::new()),
            LatencyStats::default()
        );
    }

    #[test]
    fn test_counters_and_error_kinds() {
        let sink = MetricsSink::new();
        sink.record_call(&success(100));
        sink.record_call(&CallSummary {
            degraded: true,
            ..success(200)
        });
        sink.record_call(&failure(ErrorKind::Timeout));
        sink.record_call(&failure(ErrorKind::Timeout));
        sink.record_call(&failure(ErrorKind::EchoDetected));
        sink.record_retry();
        sink.record_circuit_trip();

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.total_requests, 5);
        assert_eq!(snapshot.successes, 2);
        assert_eq!(snapshot.degraded, 1);
        assert_eq!(snapshot.failures, 3);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.circuit_trips, 1);
        assert_eq!(snapshot.errors_by_kind[&ErrorKind::Timeout], 2);
        assert_eq!(snapshot.errors_by_kind[&ErrorKind::EchoDetected], 1);
        assert!((snapshot.error_rate() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_window_keeps_latest_samples() {
        let sink = MetricsSink::new();
        for ms in 0..(MAX_LATENCY_SAMPLES as u64 + 10) {
            sink.record_call(&success(ms));
        }

        let latency = sink.snapshot().latency;
        assert_eq!(latency.samples, MAX_LATENCY_SAMPLES);
        assert_eq!(latency.min_ms, 10);
    }

    #[test]
    fn test_rate_limit_waits() {
        let sink = MetricsSink::new();
        sink.record_rate_limit_wait(Duration::ZERO);
        sink.record_rate_limit_wait(Duration::from_millis(40));
        sink.record_rate_limit_wait(Duration::from_millis(60));

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.rate_limited, 2);
        assert!((snapshot.avg_rate_limit_wait_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_everything() {
        let sink = MetricsSink::new();
        sink.record_call(&success(5));
        sink.reset();
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.latency.samples, 0);
    }

    #[test]
    fn test_prometheus_exposition() {
        let sink = MetricsSink::new();
        sink.record_call(&success(500));
        sink.record_call(&success(4_000));
        sink.record_call(&failure(ErrorKind::Parse));

        let text = sink.to_prometheus(CircuitState::HalfOpen);

        assert!(text.contains("pulse_requests_total 3\n"));
        assert!(text.contains("pulse_requests_failed_total 1\n"));
        assert!(text.contains("pulse_request_duration_seconds_bucket{le=\"1\"} 2\n"));
        assert!(text.contains("pulse_request_duration_seconds_bucket{le=\"5\"} 3\n"));
        assert!(text.contains("pulse_request_duration_seconds_bucket{le=\"+Inf\"} 3\n"));
        assert!(text.contains("pulse_request_duration_seconds_sum 4.51\n"));
        assert!(text.contains("pulse_circuit_breaker_state 1\n"));
        assert!(text.contains("# TYPE pulse_rate_limited_total counter\n"));
    }
}
