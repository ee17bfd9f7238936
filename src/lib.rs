//! # sqlrun — replay SQL workloads
//!
//! Runs a fixed list of statements against a database over and over with a
//! bounded number of concurrent workers, and reports every statement as it
//! starts, finishes or fails.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sqlrun::prelude::*;
//!
//! let config = Configuration::new(
//!     "postgres://localhost/bench",
//!     vec![Query::new("SELECT * FROM orders WHERE id = 1")],
//! )
//! .worker_threads(8)
//! .max_duration_seconds(60)
//! .max_iterations(1_000_000);
//!
//! let driver = Driver::new(config, &SqlxConnector::new("postgres://localhost/bench"))?;
//! driver.subscribe(Arc::new(TracingSink::new()));
//! let report = driver.run().await?;
//! ```
//!
//! ## Termination
//!
//! | `max_iterations` | `max_duration_seconds` | Stops when                         |
//! |------------------|------------------------|------------------------------------|
//! | `0`              | `0`                    | every query ran once               |
//! | `K`              | `0`                    | `K` iterations were admitted       |
//! | any              | `D`                    | the above, or `D` seconds elapsed  |

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod query;

#[cfg(test)]
mod testing;

pub mod prelude {
    pub use crate::config::Configuration;
    pub use crate::connection::{Connection, ConnectionState, Connector, SqlxConnector};
    pub use crate::driver::{Driver, RunReport, RunState};
    pub use crate::error::*;
    pub use crate::events::{Event, EventSink, FailedQueryLog, TracingSink};
    pub use crate::executor::Outcome;
    pub use crate::metrics::{RunMetrics, RunSummary};
    pub use crate::query::{Command, CommandKind, CommandProcessor, Query, Value};
    pub use std::sync::Arc;
}

/// Run a configuration against its own `connection_string` with console logging.
///
/// # Example
///
/// ```rust,ignore
/// let config = sqlrun::config::Configuration::load("workload.toml")?;
/// let report = sqlrun::run(config).await?;
/// println!("{} iterations", report.final_iteration);
/// ```
pub async fn run(config: config::Configuration) -> error::DriverResult<driver::RunReport> {
    let connector = connection::SqlxConnector::new(&config.connection_string);
    let driver = driver::Driver::new(config, &connector)?;
    driver.subscribe(std::sync::Arc::new(events::TracingSink::new()));
    driver.run().await
}
