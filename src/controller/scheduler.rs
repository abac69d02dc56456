use chrono::{DateTime, Local, NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClockKind;
use crate::domain::{Schedule, ScheduleEntry};
use crate::simulation::{EnvironmentHandle, SimulationLoopConfig};

/// Source of the current time of day
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// Clock seconds elapsed per wall-clock second
    fn rate(&self) -> f64 {
        1.0
    }

    /// Wall time between two distinct readings, for clocks that move in steps
    fn resolution(&self) -> Option<Duration> {
        None
    }
}

/// Local wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// The kit's simulated clock, advancing `dtime_s` every `step_interval`
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    env: EnvironmentHandle,
    rate: f64,
    step_interval: Duration,
}

impl SimulatedClock {
    pub fn new(env: EnvironmentHandle, cadence: &SimulationLoopConfig) -> Self {
        Self {
            env,
            rate: cadence.dtime_s / cadence.step_interval.as_secs_f64(),
            step_interval: cadence.step_interval,
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> NaiveDateTime {
        self.env.simulated_clock()
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn resolution(&self) -> Option<Duration> {
        Some(self.step_interval)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

pub fn clock_for(
    kind: ClockKind,
    env: &EnvironmentHandle,
    cadence: &SimulationLoopConfig,
) -> Arc<dyn Clock> {
    match kind {
        ClockKind::System => Arc::new(SystemClock),
        ClockKind::Simulated => Arc::new(SimulatedClock::new(env.clone(), cadence)),
    }
}

/// Wall time for `clock_time` to pass on a clock running at `rate`, rounded up
/// so the clock has reached the target when the sleep ends.
fn wall_time(clock_time: Duration, rate: f64) -> Duration {
    let nanos = (clock_time.as_nanos() as f64 / rate).ceil();
    // saturating; a NaN rate yields zero and falls to the poll floor
    Duration::from_nanos(nanos as u64)
}

/// Driver loop timing
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Longest single sleep, so an empty or far-off schedule is still re-checked
    pub max_idle: Duration,
    /// Shortest single sleep, so an overdue entry cannot spin the loop.
    /// A stepping clock lowers it to one step.
    pub poll_floor: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(60),
            poll_floor: Duration::from_millis(100),
        }
    }
}

/// Task status tracking
#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

impl TaskStatus {
    pub fn record_start(&mut self) {
        self.last_run = Some(Utc::now());
        self.run_count += 1;
    }

    pub fn record_success(&mut self) {
        self.last_success = Some(Utc::now());
        self.success_count += 1;
        self.last_error = None;
    }

    pub fn record_error(&mut self, error: impl ToString) {
        self.error_count += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Cron-like driver: sleeps until the next entry is due, then hands every due
/// command to the dispatcher without waiting for it to run.
pub struct CommandScheduler {
    schedule: Schedule,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    dispatched: u64,
}

impl CommandScheduler {
    pub fn new(entries: Vec<ScheduleEntry>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        let schedule = Schedule::new(entries, clock.now());
        Self {
            schedule,
            clock,
            config,
            dispatched: 0,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Number of commands handed out so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Wall time the driver should sleep before polling again
    pub fn next_wait(&self) -> Duration {
        let floor = match self.clock.resolution() {
            Some(step) => step.min(self.config.poll_floor),
            None => self.config.poll_floor,
        };
        let ceiling = self.config.max_idle.max(floor);
        self.schedule
            .idle(self.clock.now())
            .and_then(|d| d.to_std().ok())
            .map_or(ceiling, |idle| wall_time(idle, self.clock.rate()))
            .clamp(floor, ceiling)
    }

    /// Collect the commands due now
    pub fn poll(&mut self) -> Vec<Value> {
        let due = self.schedule.take_due(self.clock.now());
        self.dispatched += due.len() as u64;
        due
    }

    /// Run until cancelled. `dispatch` must not block; it typically spawns.
    pub async fn run<F>(mut self, mut dispatch: F, cancel: CancellationToken)
    where
        F: FnMut(Value) + Send,
    {
        info!(entries = self.schedule.jobs().len(), "command scheduler started");
        loop {
            let wait = self.next_wait();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
            for command in self.poll() {
                debug!(%command, "command due");
                dispatch(command);
            }
        }
        info!(dispatched = self.dispatched, "command scheduler stopped");
    }
}
