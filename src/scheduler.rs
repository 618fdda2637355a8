//! Cooperative periodic scheduler.
//!
//! Tasks run sequentially on the caller's thread, in registration order,
//! whenever at least one interval has elapsed since their last run. A late
//! task runs once, never in a catch-up burst.

use crate::telemetry::TelemetryError;
use heapless::Vec as BoundedVec;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, trace, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_FAILURE_HISTORY: usize = 16;

/// Time source for the scheduler, in microseconds since an arbitrary origin.
pub trait Clock {
    fn now_us(&self) -> u64;

    /// Wait between polling passes.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to. Clones share the same time, and
/// `sleep` advances it instead of blocking.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.now_us.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn set_us(&self, now_us: u64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

impl TaskError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

pub type TaskResult = Result<(), TaskError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: TaskError,
    },
}

/// What a failing task does to the rest of the tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop and hand the error to the caller.
    #[default]
    Halt,
    /// Record the failure and keep running the other tasks.
    Isolate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub runs: u64,
    /// Runs that found the task a full interval or more past due.
    pub overruns: u64,
    pub failures: u64,
    pub last_run_us: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub invocations: u64,
    pub overruns: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub task: String,
    pub at_us: u64,
    pub reason: String,
}

pub struct ScheduledTask {
    name: String,
    interval_us: u64,
    last_run_us: u64,
    callback: Box<dyn FnMut() -> TaskResult>,
    stats: TaskStats,
}

impl ScheduledTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }

    pub fn stats(&self) -> TaskStats {
        self.stats
    }
}

impl core::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("interval_us", &self.interval_us)
            .field("last_run_us", &self.last_run_us)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Scheduler<C: Clock = MonotonicClock> {
    clock: C,
    tasks: Vec<ScheduledTask>,
    policy: FailurePolicy,
    poll_interval: Duration,
    failure_history: BoundedVec<FailureRecord, MAX_FAILURE_HISTORY>,
    stats: SchedulerStats,
}

impl Scheduler<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for Scheduler<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            tasks: Vec::new(),
            policy: FailurePolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            failure_history: BoundedVec::new(),
            stats: SchedulerStats::default(),
        }
    }

    pub fn set_failure_policy(&mut self, policy: FailurePolicy) {
        self.policy = policy;
    }

    pub fn set_poll_interval(&mut self, poll_interval: Duration) {
        self.poll_interval = poll_interval;
    }

    /// Add a periodic task. Its first run is one `interval` after now.
    pub fn register<F>(&mut self, name: &str, interval: Duration, callback: F)
    where
        F: FnMut() -> TaskResult + 'static,
    {
        debug_assert!(!interval.is_zero(), "Task '{name}' registered with zero interval");

        let last_run_us = self.clock.now_us();
        let interval_us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
        self.tasks.push(ScheduledTask {
            name: name.to_string(),
            interval_us,
            last_run_us,
            callback: Box::new(callback),
            stats: TaskStats {
                last_run_us,
                ..TaskStats::default()
            },
        });
        trace!(task = name, interval_us, "Task registered");
    }

    /// One polling pass over every task.
    pub fn tick(&mut self) -> Result<(), SchedulerError> {
        let now = self.clock.now_us();
        self.stats.ticks += 1;

        for task in &mut self.tasks {
            let elapsed = now.saturating_sub(task.last_run_us);
            if elapsed < task.interval_us {
                continue;
            }

            if elapsed >= task.interval_us.saturating_mul(2) {
                task.stats.overruns += 1;
                self.stats.overruns += 1;
                warn!(
                    task = %task.name,
                    late_us = elapsed - task.interval_us,
                    "Task overrun"
                );
            }

            let result = (task.callback)();
            task.last_run_us = now;
            task.stats.last_run_us = now;
            task.stats.runs += 1;
            self.stats.invocations += 1;

            if let Err(source) = result {
                task.stats.failures += 1;
                self.stats.failures += 1;
                error!(task = %task.name, error = %source, "Task failed");

                if self.failure_history.is_full() {
                    self.failure_history.remove(0);
                }
                let _ = self.failure_history.push(FailureRecord {
                    task: task.name.clone(),
                    at_us: now,
                    reason: source.to_string(),
                });

                if self.policy == FailurePolicy::Halt {
                    return Err(SchedulerError::TaskFailed {
                        task: task.name.clone(),
                        source,
                    });
                }
            }
        }

        Ok(())
    }

    /// Tick forever, sleeping one poll interval between passes. Only returns
    /// on a halting task failure.
    pub fn run_forever(&mut self) -> Result<(), SchedulerError> {
        loop {
            self.tick()?;
            self.clock.sleep(self.poll_interval);
        }
    }

    /// Like [`Scheduler::run_forever`] but checks `stop` between ticks.
    pub fn run_until(&mut self, stop: &AtomicBool) -> Result<(), SchedulerError> {
        while !stop.load(Ordering::Relaxed) {
            self.tick()?;
            self.clock.sleep(self.poll_interval);
        }
        Ok(())
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn task_stats(&self, name: &str) -> Option<TaskStats> {
        self.tasks.iter().find(|t| t.name == name).map(|t| t.stats)
    }

    pub fn task_runs(&self, name: &str) -> Option<u64> {
        self.task_stats(name).map(|s| s.runs)
    }

    pub fn failure_history(&self) -> &[FailureRecord] {
        &self.failure_history
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}
