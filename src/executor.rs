//! Runs one query descriptor on a pooled connection.

use crate::config::Configuration;
use crate::error::{DriverError, DriverResult};
use crate::events::{Event, EventBus};
use crate::pool::ConnectionPool;
use crate::query::{Command, CommandProcessor, Query};

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a single execution. Failures are values, never panics or `Err`.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        elapsed: Duration,
        row_count: u64,
    },
    Failure {
        elapsed: Duration,
        error: Arc<DriverError>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Success { elapsed, .. } | Self::Failure { elapsed, .. } => *elapsed,
        }
    }
}

pub struct QueryExecutor {
    pool: Arc<ConnectionPool>,
    events: Arc<EventBus>,
    config: Arc<Configuration>,
    processor: Option<Arc<dyn CommandProcessor>>,
}

impl QueryExecutor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        events: Arc<EventBus>,
        config: Arc<Configuration>,
        processor: Option<Arc<dyn CommandProcessor>>,
    ) -> Self {
        Self {
            pool,
            events,
            config,
            processor,
        }
    }

    /// Execute `query`, reporting through the event bus.
    ///
    /// The connection goes back to the pool before this returns, on every path.
    /// A panic in the processor hook or the connection is reported as an
    /// execution error.
    pub async fn execute(&self, iteration: i64, query: &Arc<Query>) -> Outcome {
        self.events.emit(Event::QueryStarted {
            query: Arc::clone(query),
            iteration,
        });

        let start = Instant::now();
        let result = AssertUnwindSafe(self.run(query))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(DriverError::Execution(format!(
                    "statement panicked: {}",
                    panic_message(&*panic)
                )))
            });
        let elapsed = start.elapsed();

        match result {
            Ok(row_count) => {
                self.events.emit(Event::QueryFinished {
                    query: Arc::clone(query),
                    iteration,
                    elapsed,
                    row_count,
                });
                Outcome::Success { elapsed, row_count }
            }
            Err(e) => {
                let error = Arc::new(e);
                self.events.emit(Event::Error {
                    error: Arc::clone(&error),
                    query: Arc::clone(query),
                    iteration,
                    configuration: Arc::clone(&self.config),
                });
                Outcome::Failure { elapsed, error }
            }
        }
    }

    async fn run(&self, query: &Query) -> DriverResult<u64> {
        let mut conn = self.pool.acquire().await?;

        let mut command = Command::from_query(query);
        if let Some(processor) = &self.processor {
            processor.process(query, &mut command);
        }

        if query.is_reader() {
            conn.fetch_count(&command).await
        } else {
            conn.execute(&command).await
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
