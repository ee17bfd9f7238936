//! Fixed-size connection pool.
//!
//! All handles are created unopened when the pool is built and live until the
//! pool is dropped. A checked-out handle goes back to the pool when its
//! [`PooledConnection`] guard is dropped, whatever happened while it was out.

use crate::connection::{Connection, ConnectionState, Connector};
use crate::error::{DriverError, DriverResult};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub checked_out: usize,
    /// Highest number of handles checked out at the same time.
    pub peak_checked_out: usize,
}

pub struct ConnectionPool {
    size: usize,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    available: Semaphore,
    checked_out: AtomicUsize,
    peak_checked_out: AtomicUsize,
}

impl ConnectionPool {
    /// Create `size` unopened handles.
    pub fn new(connector: &dyn Connector, size: usize) -> DriverResult<Arc<Self>> {
        if size == 0 {
            return Err(DriverError::config("connection pool size must be at least 1"));
        }
        let handles = (0..size).map(|_| connector.handle()).collect();
        Ok(Arc::new(Self {
            size,
            idle: Mutex::new(handles),
            available: Semaphore::new(size),
            checked_out: AtomicUsize::new(0),
            peak_checked_out: AtomicUsize::new(0),
        }))
    }

    /// Wait for a free handle and make sure it is open.
    ///
    /// A handle left `Broken` by its previous user is closed and reopened
    /// first. If opening fails the handle is returned to the pool and the
    /// error is handed to the caller.
    pub async fn acquire(self: &Arc<Self>) -> DriverResult<PooledConnection> {
        self.available
            .acquire()
            .await
            .map_err(|_| DriverError::Connection("connection pool is closed".to_string()))?
            .forget();

        let Some(conn) = self.lock_idle().pop() else {
            // Every permit is backed by an idle handle, so this is unreachable
            // unless that accounting is broken.
            self.available.add_permits(1);
            return Err(DriverError::Connection(
                "connection pool has no idle handle".to_string(),
            ));
        };

        let out = self.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_checked_out.fetch_max(out, Ordering::SeqCst);

        let mut pooled = PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        };
        pooled.ensure_open().await?;
        Ok(pooled)
    }

    /// Return a handle explicitly. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }

    pub fn idle(&self) -> usize {
        self.lock_idle().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            idle: self.idle(),
            checked_out: self.checked_out(),
            peak_checked_out: self.peak_checked_out.load(Ordering::SeqCst),
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn return_connection(&self, conn: Box<dyn Connection>) {
        self.lock_idle().push(conn);
        self.checked_out.fetch_sub(1, Ordering::SeqCst);
        self.available.add_permits(1);
    }
}

/// A checked-out handle that returns to the pool when dropped.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    async fn ensure_open(&mut self) -> DriverResult<()> {
        let conn = self.get_mut();
        if conn.state() == ConnectionState::Broken {
            tracing::debug!("Reopening broken connection");
            conn.close().await;
        }
        if conn.state() == ConnectionState::Closed {
            conn.open().await?;
        }
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut (dyn Connection + 'static) {
        self.conn
            .as_deref_mut()
            .expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn);
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("pooled connection is present until drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}
