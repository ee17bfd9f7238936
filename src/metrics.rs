//! Throughput accounting.
//!
//! [`RunMetrics`] keeps an in-process summary and also records through the
//! `metrics` facade, so an installed recorder (e.g. a Prometheus exporter)
//! sees the same numbers:
//!
//! - `sqlrun_statements_total{status="success"|"error"}`
//! - `sqlrun_statement_duration_ms`
//! - `sqlrun_rows_total`

use crate::events::{Event, EventSink};

use ::metrics::{counter, histogram};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Event sink counting statements, rows and latency.
///
/// Startup and cleanup statements are counted like any other statement.
#[derive(Debug, Default)]
pub struct RunMetrics {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rows: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

/// Snapshot of [`RunMetrics`] over a measured wall-clock span.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rows: u64,
    pub elapsed: Duration,
    pub mean_latency: Duration,
    pub max_latency: Duration,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self, elapsed: Duration) -> RunSummary {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);
        let mean_latency = if succeeded == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(total_latency / succeeded)
        };
        RunSummary {
            started: self.started.load(Ordering::Relaxed),
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            elapsed,
            mean_latency,
            max_latency: Duration::from_micros(self.max_latency_us.load(Ordering::Relaxed)),
        }
    }
}

impl EventSink for RunMetrics {
    fn on_event(&self, event: &Event) {
        match event {
            Event::QueryStarted { .. } => {
                self.started.fetch_add(1, Ordering::Relaxed);
            }
            Event::QueryFinished {
                elapsed, row_count, ..
            } => {
                let us = elapsed.as_micros() as u64;
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                self.rows.fetch_add(*row_count, Ordering::Relaxed);
                self.total_latency_us.fetch_add(us, Ordering::Relaxed);
                self.max_latency_us.fetch_max(us, Ordering::Relaxed);

                counter!("sqlrun_statements_total", "status" => "success").increment(1);
                counter!("sqlrun_rows_total").increment(*row_count);
                histogram!("sqlrun_statement_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
            }
            Event::Error { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                counter!("sqlrun_statements_total", "status" => "error").increment(1);
            }
            Event::Progress { .. } | Event::WorkloadFinished { .. } => {}
        }
    }
}

impl RunSummary {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Successful statements per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.succeeded as f64 / secs
        } else {
            0.0
        }
    }

    /// Share of completed statements that failed (0.0 - 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.completed() == 0 {
            0.0
        } else {
            self.failed as f64 / self.completed() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::error::DriverError;
    use crate::query::Query;
    use ::metrics::{
        Counter, CounterFn, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
        SharedString, Unit,
    };
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn finished(ms: u64, rows: u64) -> Event {
        Event::QueryFinished {
            query: Arc::new(Query::new("SELECT 1")),
            iteration: 0,
            elapsed: Duration::from_millis(ms),
            row_count: rows,
        }
    }

    #[test]
    fn test_summary_aggregates_events() {
        let metrics = RunMetrics::new();
        let query = Arc::new(Query::new("SELECT 1"));
        for iteration in 0..4 {
            metrics.on_event(&Event::QueryStarted {
                query: Arc::clone(&query),
                iteration,
            });
        }
        metrics.on_event(&finished(10, 5));
        metrics.on_event(&finished(30, 7));
        metrics.on_event(&finished(20, 0));
        metrics.on_event(&Event::Error {
            error: Arc::new(DriverError::Execution("boom".into())),
            query,
            iteration: 3,
            configuration: Arc::new(Configuration::new("mock://", vec![])),
        });

        let summary = metrics.summary(Duration::from_secs(2));
        assert_eq!(
            summary,
            RunSummary {
                started: 4,
                succeeded: 3,
                failed: 1,
                rows: 12,
                elapsed: Duration::from_secs(2),
                mean_latency: Duration::from_millis(20),
                max_latency: Duration::from_millis(30),
            }
        );
        assert_eq!(summary.completed(), 4);
        assert_eq!(summary.throughput(), 1.5);
        assert_eq!(summary.error_rate(), 0.25);
    }

    #[test]
    fn test_empty_summary() {
        let summary = RunMetrics::new().summary(Duration::ZERO);
        assert_eq!(summary.throughput(), 0.0);
        assert_eq!(summary.error_rate(), 0.0);
        assert_eq!(summary.mean_latency, Duration::ZERO);
    }

    /// Records counter increments and histogram samples by metric name.
    #[derive(Default)]
    struct Recorded {
        counters: Mutex<BTreeMap<String, u64>>,
        samples: Mutex<Vec<f64>>,
    }

    struct Handle {
        key: String,
        recorded: Arc<Recorded>,
    }

    impl CounterFn for Handle {
        fn increment(&self, value: u64) {
            *self.recorded.counters.lock().unwrap().entry(self.key.clone()).or_default() += value;
        }

        fn absolute(&self, value: u64) {
            self.recorded.counters.lock().unwrap().insert(self.key.clone(), value);
        }
    }

    impl HistogramFn for Handle {
        fn record(&self, value: f64) {
            self.recorded.samples.lock().unwrap().push(value);
        }
    }

    #[derive(Default)]
    struct TestRecorder(Arc<Recorded>);

    impl TestRecorder {
        fn handle(&self, key: &Key) -> Arc<Handle> {
            let labels: Vec<String> = key
                .labels()
                .map(|l| format!("{}={}", l.key(), l.value()))
                .collect();
            Arc::new(Handle {
                key: format!("{}{{{}}}", key.name(), labels.join(",")),
                recorded: Arc::clone(&self.0),
            })
        }
    }

    impl Recorder for TestRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            Counter::from_arc(self.handle(key))
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::from_arc(self.handle(key))
        }
    }

    #[test]
    fn test_events_are_exported_through_the_metrics_facade() {
        let recorder = TestRecorder::default();
        let metrics = RunMetrics::new();
        ::metrics::with_local_recorder(&recorder, || {
            metrics.on_event(&finished(4, 3));
            metrics.on_event(&finished(6, 2));
            metrics.on_event(&Event::Error {
                error: Arc::new(DriverError::Execution("boom".into())),
                query: Arc::new(Query::new("BAD")),
                iteration: 2,
                configuration: Arc::new(Configuration::new("mock://", vec![])),
            });
        });

        let counters = recorder.0.counters.lock().unwrap().clone();
        assert_eq!(counters["sqlrun_statements_total{status=success}"], 2);
        assert_eq!(counters["sqlrun_statements_total{status=error}"], 1);
        assert_eq!(counters["sqlrun_rows_total{}"], 5);
        assert_eq!(*recorder.0.samples.lock().unwrap(), vec![4.0, 6.0]);
    }
}
