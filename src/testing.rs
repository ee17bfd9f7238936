//! Scripted in-memory connector and event recorder for tests.

use crate::connection::{Connection, ConnectionState, Connector};
use crate::error::{DriverError, DriverResult};
use crate::events::{Event, EventSink};
use crate::query::Command;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Script {
    delay: Duration,
    rows: u64,
    fail_on: Option<String>,
    break_on: Option<String>,
    fail_opens: AtomicBool,
    executed: Mutex<Vec<String>>,
    fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

/// Connector whose handles sleep, fail or break on request.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    script: Arc<Script>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::get_mut(&mut self.script).expect("configure the mock before sharing it")
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script_mut().delay = delay;
        self
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.script_mut().rows = rows;
        self
    }

    /// Statements with exactly this text fail with an execution error.
    pub fn fail_on(mut self, text: &str) -> Self {
        self.script_mut().fail_on = Some(text.to_string());
        self
    }

    /// Statements with exactly this text fail and leave the handle broken.
    pub fn break_on(mut self, text: &str) -> Self {
        self.script_mut().break_on = Some(text.to_string());
        self
    }

    pub fn fail_opens(&self, fail: bool) {
        self.script.fail_opens.store(fail, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<String> {
        self.script.executed.lock().unwrap().clone()
    }

    /// Statements that went through `fetch_count`.
    pub fn fetched(&self) -> Vec<String> {
        self.script.fetched.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.script.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn handle(&self) -> Box<dyn Connection> {
        Box::new(MockConnection {
            script: Arc::clone(&self.script),
            state: ConnectionState::Closed,
        })
    }
}

struct MockConnection {
    script: Arc<Script>,
    state: ConnectionState,
}

impl MockConnection {
    async fn run(&mut self, command: &Command) -> DriverResult<u64> {
        if self.state != ConnectionState::Open {
            return Err(DriverError::Connection("connection is not open".to_string()));
        }
        let script = Arc::clone(&self.script);
        script.executed.lock().unwrap().push(command.text().to_string());

        let now = script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        script.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        script.in_flight.fetch_sub(1, Ordering::SeqCst);

        if script.break_on.as_deref() == Some(command.text()) {
            self.state = ConnectionState::Broken;
            return Err(DriverError::Connection("connection reset by peer".to_string()));
        }
        if script.fail_on.as_deref() == Some(command.text()) {
            return Err(DriverError::Execution(format!("cannot run {}", command.text())));
        }
        Ok(script.rows)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn open(&mut self) -> DriverResult<()> {
        if self.script.fail_opens.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("connection refused".to_string()));
        }
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        self.state = ConnectionState::Open;
        Ok(())
    }

    async fn close(&mut self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        self.state = ConnectionState::Closed;
    }

    async fn fetch_count(&mut self, command: &Command) -> DriverResult<u64> {
        if self.state == ConnectionState::Open {
            let text = command.text().to_string();
            self.script.fetched.lock().unwrap().push(text);
        }
        self.run(command).await
    }

    async fn execute(&mut self, command: &Command) -> DriverResult<u64> {
        self.run(command).await
    }
}

/// Sink that keeps every event it sees.
#[derive(Default)]
pub(crate) struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for EventLog {
    fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}
