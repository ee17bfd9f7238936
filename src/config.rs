//! Workload configuration.
//!
//! Configuration files are TOML (`*.toml`) or JSON (anything else). JSON
//! files written for older tooling with PascalCase keys (`WorkerThreads`,
//! `QueryList`, ...) are accepted as-is; unknown keys are ignored.

use crate::error::{DriverError, DriverResult};
use crate::query::Query;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_worker_threads() -> u16 {
    4
}

/// A fully resolved run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Database connection URL (`postgres://`, `mysql://`, `sqlite:`).
    #[serde(alias = "ConnectionString", default)]
    pub connection_string: String,

    /// Number of concurrent workers, and of pooled connections.
    #[serde(alias = "WorkerThreads", default = "default_worker_threads")]
    pub worker_threads: u16,

    /// `0` runs the query list exactly once.
    #[serde(alias = "MaxIterations", default)]
    pub max_iterations: u64,

    /// `0` disables the wall-clock bound.
    #[serde(alias = "MaxDurationInSeconds", alias = "max_duration_in_seconds", default)]
    pub max_duration_seconds: u64,

    #[serde(alias = "Queries", default)]
    pub queries: Vec<Query>,

    /// Plain statements appended to `queries` at load time.
    #[serde(alias = "QueryList", default)]
    pub query_list: Vec<String>,

    #[serde(alias = "Startup", default)]
    pub startup: Option<Query>,

    #[serde(alias = "Cleanup", default)]
    pub cleanup: Option<Query>,

    /// Append-only log receiving one JSON line per failed statement.
    #[serde(alias = "FailedQueriesLog", default)]
    pub failed_queries_log: Option<PathBuf>,
}

impl Configuration {
    /// Create a configuration with default limits.
    pub fn new(connection_string: impl Into<String>, queries: Vec<Query>) -> Self {
        Self {
            connection_string: connection_string.into(),
            worker_threads: default_worker_threads(),
            max_iterations: 0,
            max_duration_seconds: 0,
            queries,
            query_list: Vec::new(),
            startup: None,
            cleanup: None,
            failed_queries_log: None,
        }
    }

    pub fn worker_threads(mut self, workers: u16) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn max_duration_seconds(mut self, seconds: u64) -> Self {
        self.max_duration_seconds = seconds;
        self
    }

    pub fn startup(mut self, query: Query) -> Self {
        self.startup = Some(query);
        self
    }

    pub fn cleanup(mut self, query: Query) -> Self {
        self.cleanup = Some(query);
        self
    }

    pub fn failed_queries_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.failed_queries_log = Some(path.into());
        self
    }

    /// Load and resolve a configuration file.
    ///
    /// The result is not validated yet, so callers can still apply overrides.
    pub fn load(path: impl AsRef<Path>) -> DriverResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DriverError::config(format!("cannot read {}: {e}", path.display()))
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let mut config = if is_toml {
            Self::from_toml(&raw)?
        } else {
            Self::from_json(&raw)?
        };
        config.resolve()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> DriverResult<Self> {
        toml::from_str(raw).map_err(|e| DriverError::config(e.to_string()))
    }

    pub fn from_json(raw: &str) -> DriverResult<Self> {
        serde_json::from_str(raw).map_err(|e| DriverError::config(e.to_string()))
    }

    /// Default location when no configuration path is given.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sqlrun").join("config.toml"))
    }

    /// Inline startup/cleanup files and fold `query_list` into `queries`.
    pub fn resolve(&mut self) -> DriverResult<()> {
        if let Some(startup) = self.startup.as_mut() {
            startup.resolve_file("startup")?;
        }
        if let Some(cleanup) = self.cleanup.as_mut() {
            cleanup.resolve_file("cleanup")?;
        }
        let listed = std::mem::take(&mut self.query_list);
        self.queries.extend(listed.into_iter().map(Query::new));
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> DriverResult<()> {
        if self.worker_threads == 0 {
            return Err(DriverError::config("worker_threads must be at least 1"));
        }
        if self.connection_string.trim().is_empty() {
            return Err(DriverError::config("connection_string is not set"));
        }
        if self.queries.is_empty() {
            return Err(DriverError::config("the workload has no queries"));
        }
        if let Some(pos) = self.queries.iter().position(|q| q.text().trim().is_empty()) {
            return Err(DriverError::config(format!("query #{pos} has no text")));
        }
        for (label, query) in [("startup", &self.startup), ("cleanup", &self.cleanup)] {
            if query.as_ref().is_some_and(|q| q.text().trim().is_empty()) {
                return Err(DriverError::config(format!(
                    "{label} query needs either text or file"
                )));
            }
        }
        Ok(())
    }

    /// `None` when the wall-clock bound is disabled.
    pub fn max_duration(&self) -> Option<Duration> {
        (self.max_duration_seconds > 0).then(|| Duration::from_secs(self.max_duration_seconds))
    }

    /// The failed-query log path, ignoring blank values.
    pub fn failed_log_path(&self) -> Option<&Path> {
        self.failed_queries_log
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}
