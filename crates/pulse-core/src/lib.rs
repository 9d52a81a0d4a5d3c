//! # pulse-core
//!
//! Resilience and orchestration for the Pulse agent invocation layer.
//!
//! This crate provides:
//! - Layered YAML configuration with named profiles and range validation
//! - Dispatch spacing, circuit breaking and retry with exponential backoff
//! - Resolution of heterogeneous agent output into one payload, with echo detection
//! - Schema normalization of the payload into a `ValidatedResult`
//! - Call metrics, Prometheus exposition, a health verdict and threshold alerts
//! - The `Orchestrator` facade tying it all together

mod alerts;
mod circuit_breaker;
mod config;
mod echo;
mod health;
mod metrics;
mod orchestrator;
mod output_parser;
mod rate_limiter;
mod retry;
pub mod testing;
mod validator;

pub use alerts::{
    Alert, AlertManager, AlertRule, AlertSeverity, DEFAULT_ALERT_MIN_REQUESTS, MAX_ALERT_HISTORY,
};
pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState, Transition};
pub use config::{
    AgentConfig, CircuitBreakerConfig, ConfigError, EchoConfig, Profile, PulseConfig,
};
pub use echo::EchoGuard;
pub use health::{HealthMonitor, HealthReport, HealthStatus, HealthThresholds};
pub use metrics::{CallSummary, LatencyStats, MAX_LATENCY_SAMPLES, MetricsSink, MetricsSnapshot};
pub use orchestrator::Orchestrator;
pub use output_parser::{ExtractedPayload, OutputParser, PayloadSource};
pub use rate_limiter::RateLimiter;
pub use retry::{AttemptOutcome, AttemptRecord, RetryOutcome, RetryPolicy};
pub use validator::{MAX_CATALYSTS, ResultValidator};
