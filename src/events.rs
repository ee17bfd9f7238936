//! Notifications emitted while a workload runs.
//!
//! Every subscriber registered on an [`EventBus`] sees every [`Event`]. No
//! ordering is promised between subscribers, and events from concurrent
//! iterations interleave freely. Within one iteration `QueryStarted` always
//! comes first and is followed by at most one `QueryFinished` or `Error`.

use crate::config::Configuration;
use crate::error::DriverError;
use crate::query::Query;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Iteration tag carried by the startup statement.
pub const STARTUP_ITERATION: i64 = -1;

#[derive(Debug, Clone)]
pub enum Event {
    QueryStarted {
        query: Arc<Query>,
        iteration: i64,
    },
    QueryFinished {
        query: Arc<Query>,
        iteration: i64,
        elapsed: Duration,
        /// Rows read for readers, rows affected otherwise.
        row_count: u64,
    },
    Progress {
        iteration: i64,
        elapsed_seconds: f64,
    },
    Error {
        error: Arc<DriverError>,
        query: Arc<Query>,
        iteration: i64,
        configuration: Arc<Configuration>,
    },
    WorkloadFinished {
        final_iteration: i64,
        elapsed_seconds: f64,
    },
}

/// Receiver of workload notifications.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventSink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Fan-out of events to any number of sinks.
#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn emit(&self, event: Event) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        for sink in sinks.iter() {
            sink.on_event(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Appends every failing query to a file, one JSON document per line.
///
/// The file is opened on the first failure and kept open afterwards. A failed
/// write drops the handle so the next failure reopens it.
pub struct FailedQueryLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FailedQueryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, query: &Query) -> crate::error::DriverResult<()> {
        let mut line = serde_json::to_vec(query)?;
        line.push(b'\n');

        let mut slot = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = match slot.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?,
        };
        file.write_all(&line)?;
        *slot = Some(file);
        Ok(())
    }
}

impl EventSink for FailedQueryLog {
    fn on_event(&self, event: &Event) {
        if let Event::Error { query, .. } = event
            && let Err(e) = self.append(query)
        {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Could not write to failed query log"
            );
        }
    }
}

/// Console reporter built on `tracing`.
#[derive(Debug, Clone)]
pub struct TracingSink {
    log_queries: bool,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self { log_queries: true }
    }
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether each finished statement is logged at `info`.
    pub fn log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }
}

impl EventSink for TracingSink {
    fn on_event(&self, event: &Event) {
        match event {
            Event::QueryStarted { query, iteration } => {
                tracing::debug!(iteration, "Iteration: {iteration}\tExecuting: {query}");
            }
            Event::QueryFinished {
                query,
                iteration,
                elapsed,
                row_count,
            } => {
                if self.log_queries {
                    tracing::info!(
                        iteration,
                        elapsed_ms = elapsed.as_millis() as u64,
                        rows = row_count,
                        "Executed: {query} in {} ms.\tRow count {row_count}.",
                        elapsed.as_secs_f64() * 1000.0
                    );
                }
            }
            Event::Progress {
                iteration,
                elapsed_seconds,
            } => {
                tracing::info!(
                    iteration,
                    "Current iteration: {iteration}\tSeconds: {elapsed_seconds:.1}"
                );
            }
            Event::Error {
                error,
                query,
                iteration,
                ..
            } => {
                tracing::error!(iteration, error = %error, "{query}");
            }
            Event::WorkloadFinished {
                final_iteration,
                elapsed_seconds,
            } => {
                tracing::info!("Finished {final_iteration} iterations in {elapsed_seconds:.3} seconds");
            }
        }
    }
}
