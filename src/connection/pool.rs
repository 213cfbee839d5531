//! Connection pool.
//!
//! The pool bounds the number of connections leased at any moment across
//! all hosts and keeps a small idle set per host for reuse. A lease is
//! exclusive: while a [`PooledConnection`] exists no other task can use
//! its connection.
//!
//! Leases go back through [`ConnectionPool::release`]. A lease dropped
//! without release (a cancelled or panicked task) frees its slot and the
//! connection is discarded, since its state is unknown.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

use super::{Connection, ConnectionError, ConnectionResult, Connector};
use crate::inventory::Host;

/// Capacity used when none is configured and no fork limit exceeds it
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Pool sizing and timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent leases across all hosts. Unset means
    /// [`DEFAULT_POOL_CAPACITY`], raised to the fork limit by [`PoolConfig::sized_for`].
    pub capacity: Option<usize>,

    /// Idle connections kept per host after release
    pub max_idle_per_host: usize,

    /// How long `acquire` waits for a free slot
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            max_idle_per_host: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Fix an unset capacity so that `forks` hosts can hold a connection at
    /// once. An explicit capacity is kept as is.
    pub fn sized_for(mut self, forks: usize) -> Self {
        if self.capacity.is_none() {
            self.capacity = Some(DEFAULT_POOL_CAPACITY.max(forks));
        }
        self
    }

    /// Capacity the pool will enforce
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or(DEFAULT_POOL_CAPACITY).max(1)
    }

    pub fn with_max_idle_per_host(mut self, max_idle: usize) -> Self {
        self.max_idle_per_host = max_idle;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: usize,
    /// Connections currently leased
    pub leased: usize,
    /// Highest `leased` value observed
    pub peak_leased: usize,
    /// Idle connections across all hosts
    pub idle: usize,
    /// Connections established
    pub opened: usize,
    /// Acquisitions served from the idle set
    pub reused: usize,
    /// Connections closed because they were unhealthy, dropped or in excess
    pub discarded: usize,
    /// Failed establishment attempts
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    leased: AtomicUsize,
    peak_leased: AtomicUsize,
    opened: AtomicUsize,
    reused: AtomicUsize,
    discarded: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn lease(&self) {
        let now = self.leased.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_leased.fetch_max(now, Ordering::SeqCst);
    }

    fn unlease(&self) {
        self.leased.fetch_sub(1, Ordering::SeqCst);
    }
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    workdir: PathBuf,
    slots: Arc<Semaphore>,
    idle: Mutex<HashMap<String, Vec<Arc<dyn Connection>>>>,
    closed: AtomicBool,
    counters: Counters,
}

/// Bounded pool of reusable connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool establishing connections through `connector`.
    ///
    /// `workdir` is handed to the connector for per-run transport state.
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>, workdir: impl AsRef<Path>) -> Self {
        let capacity = config.effective_capacity();
        Self {
            inner: Arc::new(PoolInner {
                slots: Arc::new(Semaphore::new(capacity)),
                config: PoolConfig {
                    capacity: Some(capacity),
                    ..config
                },
                connector,
                workdir: workdir.as_ref().to_path_buf(),
                idle: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Lease a connection for `host`, waiting up to `acquire_timeout` for a
    /// free slot.
    pub async fn acquire(&self, host: &Host) -> ConnectionResult<PooledConnection> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::PoolClosed);
        }

        let permit = match tokio::time::timeout(
            inner.config.acquire_timeout,
            inner.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ConnectionError::PoolClosed),
            Err(_) => {
                warn!(host = %host.name(), "Timed out waiting for a connection slot");
                return Err(ConnectionError::AcquireTimeout {
                    host: host.name().to_string(),
                    timeout: inner.config.acquire_timeout,
                });
            }
        };

        if inner.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::PoolClosed);
        }

        let key = host.connection_key();
        while let Some(conn) = self.pop_idle(&key) {
            if conn.is_alive().await {
                trace!(host = %host.name(), "Reusing idle connection");
                inner.counters.reused.fetch_add(1, Ordering::SeqCst);
                return Ok(self.lease(conn, key, host, permit));
            }
            debug!(host = %host.name(), "Discarding dead idle connection");
            inner.counters.discarded.fetch_add(1, Ordering::SeqCst);
            let _ = conn.close().await;
        }

        match inner.connector.connect(host, &inner.workdir).await {
            Ok(conn) => {
                debug!(host = %host.name(), "Opened connection");
                inner.counters.opened.fetch_add(1, Ordering::SeqCst);
                Ok(self.lease(conn, key, host, permit))
            }
            Err(e) => {
                inner.counters.failed.fetch_add(1, Ordering::SeqCst);
                drop(permit);
                Err(e)
            }
        }
    }

    fn pop_idle(&self, key: &str) -> Option<Arc<dyn Connection>> {
        self.inner.idle.lock().get_mut(key).and_then(Vec::pop)
    }

    fn lease(
        &self,
        conn: Arc<dyn Connection>,
        key: String,
        host: &Host,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection {
        self.inner.counters.lease();
        PooledConnection {
            conn,
            returned: false,
            key,
            host: host.name().to_string(),
            permit: Some(permit),
            pool: self.inner.clone(),
        }
    }

    /// Return a lease. Healthy connections go back to the idle set (closed
    /// if the host already has `max_idle_per_host` idle ones), unhealthy ones
    /// are closed.
    pub async fn release(&self, mut lease: PooledConnection, healthy: bool) {
        lease.returned = true;
        let conn = lease.conn.clone();
        let inner = &self.inner;
        inner.counters.unlease();

        let overflow = if healthy {
            // `closed` is set under the same lock `close_all` drains
            let mut idle = inner.idle.lock();
            if inner.closed.load(Ordering::SeqCst) {
                Some(conn)
            } else {
                let entry = idle.entry(lease.key.clone()).or_default();
                if entry.len() < inner.config.max_idle_per_host {
                    entry.push(conn);
                    None
                } else {
                    Some(conn)
                }
            }
        } else {
            Some(conn)
        };

        if let Some(conn) = overflow {
            trace!(host = %lease.host, healthy, "Closing released connection");
            inner.counters.discarded.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = conn.close().await {
                debug!(host = %lease.host, error = %e, "Error closing connection");
            }
        }

        lease.permit.take();
    }

    /// Close idle connections and refuse new acquisitions. Outstanding
    /// leases stay valid; releasing them closes their connections.
    pub async fn close_all(&self) {
        let inner = &self.inner;
        let idle: Vec<Arc<dyn Connection>> = {
            let mut idle = inner.idle.lock();
            inner.closed.store(true, Ordering::SeqCst);
            idle.drain().flat_map(|(_, conns)| conns).collect()
        };
        inner.slots.close();

        debug!(count = idle.len(), "Closing idle connections");
        for conn in idle {
            if let Err(e) = conn.close().await {
                debug!(host = %conn.identifier(), error = %e, "Error closing connection");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let c = &inner.counters;
        PoolStats {
            capacity: inner.config.effective_capacity(),
            leased: c.leased.load(Ordering::SeqCst),
            peak_leased: c.peak_leased.load(Ordering::SeqCst),
            idle: inner.idle.lock().values().map(Vec::len).sum(),
            opened: c.opened.load(Ordering::SeqCst),
            reused: c.reused.load(Ordering::SeqCst),
            discarded: c.discarded.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
        }
    }
}

/// Exclusive lease on a pooled connection
pub struct PooledConnection {
    conn: Arc<dyn Connection>,
    returned: bool,
    key: String,
    host: String,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    /// The leased connection
    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    /// Name of the host this lease is for
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("host", &self.host)
            .field("key", &self.key)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        let conn = self.conn.clone();
        self.pool.counters.unlease();
        self.pool.counters.discarded.fetch_add(1, Ordering::SeqCst);
        debug!(host = %self.host, "Lease dropped without release, discarding connection");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = conn.close().await;
            });
        }
    }
}
