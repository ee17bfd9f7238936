//! Workload driver.
//!
//! A run moves through `NotStarted -> Running -> Draining -> Finished`:
//!
//! 1. the startup statement (if any) runs alone, tagged [`STARTUP_ITERATION`];
//! 2. iterations are admitted one at a time through a gate of
//!    `worker_threads` permits, each claiming the next value of an atomic
//!    counter and running `queries[iteration % queries.len()]` on its own task;
//! 3. once the termination policy fires for a claimed value, admission stops
//!    and the driver waits for every permit to come back;
//! 4. the cleanup statement (if any) runs, tagged one past the last claimed
//!    value, and `WorkloadFinished` is emitted.
//!
//! The wall-clock bound is only checked at admission. A statement that is
//! already running is never interrupted, so a stuck statement blocks the
//! drain indefinitely.

use crate::config::Configuration;
use crate::connection::Connector;
use crate::error::{DriverError, DriverResult};
use crate::events::{Event, EventBus, EventSink, FailedQueryLog, STARTUP_ITERATION};
use crate::executor::QueryExecutor;
use crate::pool::ConnectionPool;
use crate::query::{CommandProcessor, Query};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// A `Progress` event fires every this many claimed iterations.
pub const PROGRESS_INTERVAL: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Draining,
    Finished,
}

/// When to stop admitting iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub max_iterations: u64,
    pub query_count: usize,
    pub max_duration: Option<Duration>,
}

impl TerminationPolicy {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            max_iterations: config.max_iterations,
            query_count: config.queries.len(),
            max_duration: config.max_duration(),
        }
    }

    /// Whether the just-claimed `iteration` must not run.
    pub fn is_complete(&self, iteration: i64, elapsed: Duration) -> bool {
        let claimed = u64::try_from(iteration).unwrap_or(0);
        let by_count = if self.max_iterations > 0 {
            claimed >= self.max_iterations
        } else {
            claimed >= self.query_count as u64
        };
        let by_time = self.max_duration.is_some_and(|max| elapsed > max);
        by_count || by_time
    }
}

/// Per-run iteration counter. Each call to [`claim`](Self::claim) returns a
/// distinct value, starting at 0.
#[derive(Debug, Default)]
pub struct IterationCounter(AtomicI64);

impl IterationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Number of ordinary iterations admitted.
    pub final_iteration: i64,
    /// Wall-clock time from the first admission to the end of cleanup.
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
}

pub struct Driver {
    config: Arc<Configuration>,
    queries: Arc<[Arc<Query>]>,
    startup: Option<Arc<Query>>,
    cleanup: Option<Arc<Query>>,
    pool: Arc<ConnectionPool>,
    events: Arc<EventBus>,
    processor: Option<Arc<dyn CommandProcessor>>,
    state: Mutex<RunState>,
    active: AtomicBool,
}

/// Clears the driver's `active` flag when a run ends, however it ends.
struct ActiveRun<'a>(&'a AtomicBool);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Driver {
    /// Validate `config` and create one unopened connection per worker.
    ///
    /// When `failed_queries_log` is set, a [`FailedQueryLog`] is subscribed
    /// before anything else.
    pub fn new(config: Configuration, connector: &dyn Connector) -> DriverResult<Self> {
        config.validate()?;

        let pool = ConnectionPool::new(connector, usize::from(config.worker_threads))?;
        let events = Arc::new(EventBus::default());
        if let Some(path) = config.failed_log_path() {
            events.subscribe(Arc::new(FailedQueryLog::new(path)));
        }

        let queries = config.queries.iter().cloned().map(Arc::new).collect();
        let startup = config.startup.clone().map(Arc::new);
        let cleanup = config.cleanup.clone().map(Arc::new);

        Ok(Self {
            config: Arc::new(config),
            queries,
            startup,
            cleanup,
            pool,
            events,
            processor: None,
            state: Mutex::new(RunState::NotStarted),
            active: AtomicBool::new(false),
        })
    }

    /// Install the parameter binding hook.
    pub fn with_processor(mut self, processor: Arc<dyn CommandProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.events.subscribe(sink);
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn number_of_queries(&self) -> usize {
        self.queries.len()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: RunState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = ?*state, to = ?next, "Driver state change");
        *state = next;
    }

    fn begin(&self) -> DriverResult<ActiveRun<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DriverError::AlreadyRunning)?;
        self.transition(RunState::NotStarted);
        Ok(ActiveRun(&self.active))
    }

    /// Run the workload to completion.
    ///
    /// Statement failures never make this return `Err`; they are reported
    /// through `Error` events and the run continues.
    pub async fn run(&self) -> DriverResult<RunReport> {
        let _active = self.begin()?;

        let workers = self.config.worker_threads;
        let policy = TerminationPolicy::from_config(&self.config);
        let executor = Arc::new(QueryExecutor::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.events),
            Arc::clone(&self.config),
            self.processor.clone(),
        ));

        if let Some(startup) = &self.startup {
            executor.execute(STARTUP_ITERATION, startup).await;
        }

        self.transition(RunState::Running);
        tracing::info!(
            workers,
            queries = self.queries.len(),
            max_iterations = self.config.max_iterations,
            max_duration_seconds = self.config.max_duration_seconds,
            "Starting workload"
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let gate = Arc::new(Semaphore::new(usize::from(workers)));
        let counter = IterationCounter::new();

        let admitted = loop {
            let permit = Arc::clone(&gate)
                .acquire_owned()
                .await
                .map_err(|_| DriverError::Execution("concurrency gate closed".to_string()))?;
            let iteration = counter.claim();

            if iteration > 0 && iteration % PROGRESS_INTERVAL == 0 {
                self.events.emit(Event::Progress {
                    iteration,
                    elapsed_seconds: start.elapsed().as_secs_f64(),
                });
            }

            if policy.is_complete(iteration, start.elapsed()) {
                drop(permit);
                break iteration;
            }

            let slot = iteration as usize % self.queries.len();
            let query = Arc::clone(&self.queries[slot]);
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor.execute(iteration, &query).await;
                drop(permit);
            });
        };

        self.transition(RunState::Draining);
        tracing::debug!(admitted, "Waiting for in-flight iterations");
        let drained = gate
            .acquire_many(u32::from(workers))
            .await
            .map_err(|_| DriverError::Execution("concurrency gate closed".to_string()))?;
        drop(drained);
        if self.pool.checked_out() != 0 {
            tracing::warn!(
                checked_out = self.pool.checked_out(),
                "Connections still checked out after drain"
            );
        }

        if let Some(cleanup) = &self.cleanup {
            executor.execute(admitted + 1, cleanup).await;
        }

        let elapsed = start.elapsed();
        self.events.emit(Event::WorkloadFinished {
            final_iteration: admitted,
            elapsed_seconds: elapsed.as_secs_f64(),
        });
        self.transition(RunState::Finished);

        Ok(RunReport {
            final_iteration: admitted,
            elapsed,
            started_at,
        })
    }
}
