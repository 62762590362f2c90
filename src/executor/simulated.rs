//! Simulated backend.
//!
//! Stands in for the real image-generation service: it walks through a few
//! progress steps and then succeeds, fails at a configured rate, or follows a
//! per-input script of outcomes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;

use super::{ErrorKind, ExecutionError, ExecutionOutput, Executor, ProgressReporter};

/// What a scripted call should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedOutcome {
    /// Run the normal progress steps, then succeed
    Succeed,
    /// Sleep for the given time, then succeed
    SucceedAfter(Duration),
    /// Run the progress steps, then fail with this kind
    Fail(ErrorKind),
    /// Never settle
    Hang,
    /// Panic inside the execution
    Panic,
}

/// Kinds drawn for random failures
const RANDOM_FAILURES: [ErrorKind; 4] = [
    ErrorKind::Timeout,
    ErrorKind::Server,
    ErrorKind::RateLimited,
    ErrorKind::InvalidInput,
];

/// Executor that fakes a generation backend
#[derive(Debug)]
pub struct SimulatedExecutor {
    steps: u8,
    step_delay: Duration,
    failure_rate: f64,
    script: Mutex<HashMap<String, VecDeque<SimulatedOutcome>>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Tracks concurrent executions, including ones that are aborted mid-flight
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedExecutor {
    /// Executor with `steps` progress updates spaced `step_delay` apart
    pub fn new(steps: u8, step_delay: Duration) -> Self {
        Self {
            steps: steps.max(1),
            step_delay,
            failure_rate: 0.0,
            script: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Executor that settles without sleeping
    pub fn instant() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Fail unscripted calls with this probability
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Queue outcomes for calls with exactly this input, consumed in order
    pub fn script(&self, input: &str, outcomes: impl IntoIterator<Item = SimulatedOutcome>) {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.entry(input.to_string()).or_default().extend(outcomes);
    }

    /// Total calls to `execute`
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Executions currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest concurrency observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, input: &str) -> SimulatedOutcome {
        let scripted = {
            let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
            script.get_mut(input).and_then(|q| q.pop_front())
        };
        if let Some(outcome) = scripted {
            return outcome;
        }

        let mut rng = rand::rng();
        if self.failure_rate > 0.0 && rng.random::<f64>() < self.failure_rate {
            let kind = RANDOM_FAILURES[rng.random_range(0..RANDOM_FAILURES.len())];
            SimulatedOutcome::Fail(kind)
        } else {
            SimulatedOutcome::Succeed
        }
    }

    fn enter(&self) -> InFlightGuard<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            counter: &self.in_flight,
        }
    }

    async fn run_steps(&self, progress: &ProgressReporter) {
        for step in 1..=self.steps {
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            // Hold back the final 100 for the completion transition
            let percent = (u16::from(step) * 90 / u16::from(self.steps)) as u8;
            progress.report(percent);
        }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, input: &str, progress: ProgressReporter) -> Result<ExecutionOutput, ExecutionError> {
        let _guard = self.enter();
        let started = Instant::now();

        match self.next_outcome(input) {
            SimulatedOutcome::Succeed => self.run_steps(&progress).await,
            SimulatedOutcome::SucceedAfter(delay) => tokio::time::sleep(delay).await,
            SimulatedOutcome::Fail(kind) => {
                self.run_steps(&progress).await;
                return Err(ExecutionError::new(kind, format!("simulated {} failure", kind.code())));
            }
            SimulatedOutcome::Hang => std::future::pending::<()>().await,
            SimulatedOutcome::Panic => panic!("simulated executor panic"),
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        Ok(ExecutionOutput::new(
            serde_json::json!({
                "input": input,
                "image": format!("sim://{}.png", self.calls()),
            }),
            duration_ms,
        ))
    }
}
