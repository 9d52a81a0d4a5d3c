//! The public facade: one request in, one validated result or error out.
//!
//! Each attempt takes a concurrency slot, then waits on the rate limiter and
//! passes the circuit breaker before the agent runs. Raw output is persisted,
//! resolved to a payload and validated. The retry policy decides whether a
//! failed attempt runs again. The breaker and the metrics sink see every
//! outcome, and alert rules are checked after each call.

use crate::alerts::{Alert, AlertManager};
use crate::circuit_breaker::{CircuitBreaker, Transition};
use crate::config::{ConfigError, PulseConfig};
use crate::echo::EchoGuard;
use crate::health::{HealthMonitor, HealthReport};
use crate::metrics::{CallSummary, MetricsSink, MetricsSnapshot};
use crate::output_parser::OutputParser;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::validator::ResultValidator;
use pulse_adapters::{AgentRunner, ProcessInvoker, persist_output};
use pulse_proto::{AgentError, AgentRequest, ValidatedResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

pub struct Orchestrator {
    runner: Arc<dyn AgentRunner>,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    parser: OutputParser,
    validator: ResultValidator,
    metrics: MetricsSink,
    health: HealthMonitor,
    alerts: AlertManager,
    slots: Semaphore,
    next_request_id: AtomicU64,
}

impl Orchestrator {
    /// Builds an orchestrator around any runner. `config` is used as-is.
    pub fn new(runner: Arc<dyn AgentRunner>, config: &PulseConfig) -> Self {
        Self {
            runner,
            rate_limiter: RateLimiter::new(config.rate_limit()),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            retry: RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.base_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
            parser: OutputParser::new(EchoGuard::new(&config.echo)),
            validator: ResultValidator::default(),
            metrics: MetricsSink::new(),
            health: HealthMonitor::default(),
            alerts: AlertManager::default(),
            slots: Semaphore::new(config.max_concurrent_requests.max(1)),
            next_request_id: AtomicU64::new(0),
        }
    }

    /// Validates `config` and builds an orchestrator that spawns the
    /// configured agent CLI.
    pub fn from_config(config: &PulseConfig) -> Result<Self, ConfigError> {
        for warning in config.validate()? {
            warn!("Config: {}", warning);
        }
        let invoker = ProcessInvoker::new(config.backend(), config.invoker_config());
        Ok(Self::new(Arc::new(invoker), config))
    }

    /// Runs `request` to completion, retrying as the policy allows.
    pub async fn invoke(&self, request: &AgentRequest) -> Result<ValidatedResult, AgentError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("invoke", request_id);

        async {
            let started = Instant::now();
            let outcome = self
                .retry
                .execute(|attempt| self.attempt(request, attempt))
                .await;

            for record in &outcome.attempts {
                debug!(
                    attempt = record.attempt_number,
                    started_at = %record.started_at,
                    duration_ms = record.duration_ms,
                    outcome = ?record.outcome,
                    error_kind = ?record.error_kind,
                    "Attempt record"
                );
            }
            for _ in 0..outcome.retries() {
                self.metrics.record_retry();
            }

            let summary = CallSummary {
                latency: started.elapsed(),
                error_kind: outcome.result.as_ref().err().map(AgentError::kind),
                attempts: outcome.attempts.len() as u32,
                degraded: outcome.result.as_ref().is_ok_and(|r| r.degraded),
            };
            self.metrics.record_call(&summary);
            self.alerts.check(&self.metrics.snapshot(), self.breaker.state());

            let elapsed_ms = summary.latency.as_millis() as u64;
            match &outcome.result {
                Ok(result) => info!(
                    attempts = summary.attempts,
                    elapsed_ms,
                    sentiment = %result.sentiment,
                    degraded = result.degraded,
                    "Invocation succeeded"
                ),
                Err(e) => warn!(
                    attempts = summary.attempts,
                    elapsed_ms,
                    error_kind = %e.kind(),
                    "Invocation failed: {}",
                    e
                ),
            }

            outcome.result
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &self,
        request: &AgentRequest,
        attempt: u32,
    ) -> Result<ValidatedResult, AgentError> {
        // Held until the breaker has seen this attempt's outcome.
        let _slot = self.slots.acquire().await.map_err(|_| {
            AgentError::Io(std::io::Error::other("concurrency limiter closed"))
        })?;

        // Pacing and admission happen after queueing, right before dispatch.
        let waited = self.rate_limiter.acquire().await;
        self.metrics.record_rate_limit_wait(waited);

        if let Some(transition) = self.breaker.try_acquire()? {
            self.on_transition(transition);
        }

        debug!(attempt, "Dispatching agent");
        let result = self.run_once(request).await;

        let transition = match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) => self.breaker.record_failure(e.kind()),
        };
        if let Some(transition) = transition {
            self.on_transition(transition);
        }

        result
    }

    async fn run_once(&self, request: &AgentRequest) -> Result<ValidatedResult, AgentError> {
        let raw = self.runner.run(request).await?;

        if let Err(e) = persist_output(request.output_file(), &raw).await {
            warn!(
                path = %request.output_file().display(),
                error = %e,
                "Failed to persist raw agent output"
            );
        }
        if !raw.success() {
            debug!(
                exit_code = raw.exit_code,
                stderr = %raw.stderr,
                "Agent exited non-zero, parsing its output anyway"
            );
        }

        let payload = self.parser.resolve(&raw.stdout, request.prompt())?;
        self.validator.normalize(&payload.value)
    }

    fn on_transition(&self, transition: Transition) {
        if transition.is_trip() {
            self.metrics.record_circuit_trip();
        }
        info!(
            from = %transition.from,
            to = %transition.to,
            "Circuit breaker transition"
        );
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn health(&self) -> HealthReport {
        self.health.evaluate(self.metrics.snapshot(), self.breaker.state())
    }

    /// Alerts fired so far, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.history()
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Prometheus exposition of metrics and circuit state.
    pub fn prometheus(&self) -> String {
        self.metrics.to_prometheus(self.breaker.state())
    }
}
