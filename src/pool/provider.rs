//! Bounded pool of catalog connections.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

use super::connection::{CatalogConnection, Connector};
use super::retry::{retry_transient, RetryPolicy};
use crate::config::PoolSettings;
use crate::{Error, Result};

/// Capacity of the lifecycle event channel; slow subscribers lose old events.
const EVENT_CAPACITY: usize = 256;

/// Pool sizing and timing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    /// Idle connections older than this are pinged before reuse.
    pub health_check_idle: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_size: settings.max_size.max(1),
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
            health_check_idle: Duration::from_secs(settings.health_check_idle_secs),
            retry: RetryPolicy::from(settings),
        }
    }
}

/// Connection lifecycle events, published without blocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A new session was opened.
    Opened { open: usize },
    /// An idle session was handed out again.
    Reused,
    /// An idle session failed its health check and was dropped.
    Evicted { reason: String },
    /// A session went back to the idle list.
    Released,
    /// A session was dropped after a transient failure.
    Discarded,
    /// Opening a session failed.
    ConnectFailed { attempt: u32, error: String },
    /// `acquire` gave up waiting.
    Exhausted { waited: Duration },
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub open: usize,
    pub idle: usize,
    pub available: usize,
    pub max_size: usize,
}

struct IdleConnection {
    conn: Arc<dyn CatalogConnection>,
    idle_since: Instant,
}

struct PoolShared {
    idle: Mutex<Vec<IdleConnection>>,
    open: AtomicUsize,
    events: broadcast::Sender<PoolEvent>,
}

impl PoolShared {
    fn emit(&self, event: PoolEvent) {
        tracing::debug!(?event, "pool event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<IdleConnection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pool of catalog connections with bounded acquisition.
///
/// At most `max_size` connections are checked out at once. Idle connections
/// that fail a health check are evicted and replaced, never handed out.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            permits: Arc::new(Semaphore::new(config.max_size)),
            connector,
            config,
            shared: Arc::new(PoolShared {
                idle: Mutex::new(Vec::new()),
                open: AtomicUsize::new(0),
                events,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            open: self.shared.open.load(Ordering::SeqCst),
            idle: self.shared.idle().len(),
            available: self.permits.available_permits(),
            max_size: self.config.max_size,
        }
    }

    /// Check out a connection, waiting up to `acquire_timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::PoolExhausted`] when no connection frees up in time, or
    /// [`Error::TransientConnectivity`] when a new session cannot be opened.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.acquire_with(&self.config.retry).await
    }

    /// `acquire` with an explicit policy for opening a new session.
    async fn acquire_with(&self, connect_policy: &RetryPolicy) -> Result<PooledConnection> {
        let timeout = self.config.acquire_timeout;
        let permit = match tokio::time::timeout(timeout, self.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::Internal("connection pool is closed".to_string())),
            Err(_) => {
                self.shared.emit(PoolEvent::Exhausted { waited: timeout });
                return Err(Error::PoolExhausted(timeout));
            }
        };

        loop {
            let candidate = self.shared.idle().pop();
            let Some(idle) = candidate else { break };

            if idle.idle_since.elapsed() < self.config.health_check_idle {
                self.shared.emit(PoolEvent::Reused);
                return Ok(PooledConnection::new(idle.conn, permit, self.shared.clone()));
            }
            match idle.conn.ping().await {
                Ok(()) => {
                    self.shared.emit(PoolEvent::Reused);
                    return Ok(PooledConnection::new(idle.conn, permit, self.shared.clone()));
                }
                Err(err) => {
                    self.shared.open.fetch_sub(1, Ordering::SeqCst);
                    self.shared.emit(PoolEvent::Evicted {
                        reason: err.to_string(),
                    });
                    idle.conn.close().await;
                }
            }
        }

        let conn = retry_transient(connect_policy, "connect", |attempt| {
            let connector = self.connector.clone();
            let shared = self.shared.clone();
            async move {
                let result = connector.connect().await;
                if let Err(err) = &result {
                    shared.emit(PoolEvent::ConnectFailed {
                        attempt,
                        error: err.to_string(),
                    });
                }
                result
            }
        })
        .await?;

        let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.emit(PoolEvent::Opened { open });
        Ok(PooledConnection::new(conn, permit, self.shared.clone()))
    }

    /// Return a connection. Equivalent to dropping it.
    pub fn release(&self, handle: PooledConnection) {
        drop(handle);
    }

    /// Run `f` with a checked-out connection.
    ///
    /// The connection is released on every exit path, including errors and
    /// cancellation. A transient failure discards it instead of reusing it.
    pub async fn with_connection<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn CatalogConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.acquire().await?;
        Self::run_on(handle, f).await
    }

    /// Like [`with_connection`](Self::with_connection), retrying transient
    /// failures on a fresh connection with backoff.
    ///
    /// Opening the session and running `f` share one attempt budget, so a
    /// dead listener is dialled at most `max_attempts` times. Statement
    /// timeouts are not retried.
    pub async fn with_retry<T, F, Fut>(&self, label: &str, f: F) -> Result<T>
    where
        F: Fn(Arc<dyn CatalogConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let single = &RetryPolicy::none();
        let f = &f;
        retry_transient(&self.config.retry, label, |_| async move {
            let handle = self.acquire_with(single).await?;
            Self::run_on(handle, f).await
        })
        .await
    }

    async fn run_on<T, F, Fut>(mut handle: PooledConnection, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn CatalogConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = f(handle.connection()).await;
        // A timed-out session may still be executing; never hand it out again
        if matches!(&result, Err(err) if err.is_transient() || matches!(err, Error::StatementTimeout(_)))
        {
            handle.discard();
        }
        result
    }

    /// Close idle connections and refuse further acquisitions.
    pub async fn close(&self) {
        self.permits.close();
        let idle: Vec<IdleConnection> = std::mem::take(&mut *self.shared.idle());
        for entry in idle {
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
            entry.conn.close().await;
        }
        tracing::info!("connection pool closed");
    }
}

/// A checked-out connection; returns to the pool on drop.
pub struct PooledConnection {
    conn: Arc<dyn CatalogConnection>,
    discard: bool,
    shared: Arc<PoolShared>,
    // Dropped after `drop` has returned the connection to the idle list
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(
        conn: Arc<dyn CatalogConnection>,
        permit: OwnedSemaphorePermit,
        shared: Arc<PoolShared>,
    ) -> Self {
        Self {
            conn,
            discard: false,
            shared,
            _permit: permit,
        }
    }

    pub fn connection(&self) -> Arc<dyn CatalogConnection> {
        self.conn.clone()
    }

    /// Do not return this connection to the pool.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = self.conn.clone();
        if self.discard {
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
            self.shared.emit(PoolEvent::Discarded);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { conn.close().await });
            }
            return;
        }
        self.shared.idle().push(IdleConnection {
            conn,
            idle_since: Instant::now(),
        });
        self.shared.emit(PoolEvent::Released);
    }
}
