//! Scripted agent runner.

use async_trait::async_trait;
use pulse_adapters::{AgentRunner, RawOutput};
use pulse_proto::{AgentError, AgentRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// One scripted response.
#[derive(Debug)]
pub enum MockStep {
    Output(RawOutput),
    Fail(AgentError),
    /// Sleeps before producing the inner step.
    Delayed(Duration, Box<MockStep>),
}

impl MockStep {
    /// A successful run printing `stdout`.
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self::Output(RawOutput::from_stdout(stdout))
    }

    pub fn fail(error: AgentError) -> Self {
        Self::Fail(error)
    }

    /// This step, answered only after `delay`.
    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }

    fn delay(&self) -> Duration {
        match self {
            Self::Delayed(delay, step) => *delay + step.delay(),
            _ => Duration::ZERO,
        }
    }

    fn into_result(self) -> Result<RawOutput, AgentError> {
        match self {
            Self::Output(output) => Ok(output),
            Self::Fail(error) => Err(error),
            Self::Delayed(_, step) => step.into_result(),
        }
    }
}

type StepFactory = Arc<dyn Fn() -> MockStep + Send + Sync>;

struct MockState {
    script: VecDeque<MockStep>,
    fallback: Option<StepFactory>,
    prompts: Vec<String>,
    dispatched_at: Vec<Instant>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Runner that replays scripted steps in order.
///
/// Once the script is exhausted the fallback step (if any) is produced for
/// every further call; without one the call fails with a parse error.
#[derive(Clone)]
pub struct MockRunner {
    state: Arc<Mutex<MockState>>,
    delay: Duration,
}

impl MockRunner {
    pub fn new(steps: impl IntoIterator<Item = MockStep>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: steps.into_iter().collect(),
                fallback: None,
                prompts: Vec::new(),
                dispatched_at: Vec::new(),
                in_flight: 0,
                max_in_flight: 0,
            })),
            delay: Duration::ZERO,
        }
    }

    /// A runner whose every call produces `step()`.
    pub fn always(step: impl Fn() -> MockStep + Send + Sync + 'static) -> Self {
        Self::new([]).with_fallback(step)
    }

    pub fn with_fallback(self, step: impl Fn() -> MockStep + Send + Sync + 'static) -> Self {
        self.lock().fallback = Some(Arc::new(step));
        self
    }

    /// Each call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of times `run` was called.
    pub fn invocation_count(&self) -> usize {
        self.lock().prompts.len()
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    /// When each `run` call started, in call order.
    pub fn dispatch_times(&self) -> Vec<Instant> {
        self.lock().dispatched_at.clone()
    }

    /// Highest number of simultaneous `run` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }
}

#[async_trait]
impl AgentRunner for MockRunner {
    async fn run(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        let step = {
            let mut state = self.lock();
            state.prompts.push(request.prompt().to_string());
            state.dispatched_at.push(Instant::now());
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);

            match state.script.pop_front() {
                Some(step) => Some(step),
                None => state.fallback.as_ref().map(|make| make()),
            }
        };

        let delay = self.delay + step.as_ref().map_or(Duration::ZERO, MockStep::delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.lock().in_flight -= 1;

        match step {
            Some(step) => step.into_result(),
            None => Err(AgentError::Parse("mock script exhausted".to_string())),
        }
    }
}
