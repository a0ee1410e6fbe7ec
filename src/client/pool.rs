//! Per-host backend connection pools.
//!
//! # Responsibilities
//! - Keep idle HTTP/1.1 connections per backend host:port
//! - Bound concurrent connections and the number of waiting acquires
//! - Reject closed or idle-expired connections on acquire
//! - Evict idle connections in the background
//!
//! # Data Flow
//! ```text
//! acquire()
//!     → connection permit (immediate, or wait up to acquire timeout;
//!       waiting beyond max_pending fails at once)
//!     → reuse newest healthy idle connection, or connect + handshake
//!     → PooledConnection
//!         → release(): back to the idle list
//!         → drop: connection closed, permit returned
//! ```
//!
//! # Design Decisions
//! - One pool per host:port, created through the registry map entry so
//!   concurrent first requests share one pool
//! - A permit travels with the connection; idle connections hold none
//! - On acquire timeout the pool either fails or opens an extra connection
//!   outside the bound, as configured

use dashmap::DashMap;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

use crate::client::body::TrackedBody;
use crate::config::{AcquireTimeoutAction, PoolConfig};
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::resilience::timeouts::{with_deadline, BackendTimeouts};

type Sender = http1::SendRequest<TrackedBody>;

/// Limits shared by every pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub max_pending: usize,
    pub acquire_timeout: Duration,
    pub acquire_timeout_action: AcquireTimeoutAction,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl PoolSettings {
    pub fn new(pool: &PoolConfig, timeouts: &BackendTimeouts) -> Self {
        Self {
            max_connections: pool.max_connections_per_host.max(1),
            max_pending: pool.max_pending_acquires,
            acquire_timeout: Duration::from_millis(pool.acquire_timeout_ms),
            acquire_timeout_action: pool.acquire_timeout_action,
            connect_timeout: timeouts.connect,
            idle_timeout: timeouts.idle,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::new(&PoolConfig::default(), &BackendTimeouts::default())
    }
}

#[derive(Debug)]
struct IdleConnection {
    id: u64,
    sender: Sender,
    idle_since: Instant,
}

/// Bounded connection pool for one backend host:port.
#[derive(Debug)]
pub struct ConnectionPool {
    host: String,
    port: u16,
    authority: String,
    settings: PoolSettings,
    idle: Mutex<VecDeque<IdleConnection>>,
    permits: Arc<Semaphore>,
    pending: AtomicUsize,
    next_id: AtomicU64,
}

/// Decrements the pending counter when the wait ends.
struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConnectionPool {
    pub fn new(host: impl Into<String>, port: u16, settings: PoolSettings) -> Self {
        let host = host.into();
        Self {
            authority: format!("{}:{}", host, port),
            host,
            port,
            permits: Arc::new(Semaphore::new(settings.max_connections)),
            settings,
            idle: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("pool mutex poisoned").len()
    }

    /// Connections currently checked out under the bound.
    pub fn in_use(&self) -> usize {
        self.settings.max_connections - self.permits.available_permits()
    }

    /// Check out a connection.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, GatewayError> {
        let permit = self.acquire_permit().await?;

        while let Some(idle) = self.pop_idle() {
            if let Some(sender) = self.check_idle(idle.sender, idle.idle_since).await {
                tracing::trace!(backend = %self.authority, connection = idle.id, "Reusing pooled connection");
                return Ok(PooledConnection {
                    pool: self.clone(),
                    id: idle.id,
                    sender: Some(sender),
                    reused: true,
                    _permit: permit,
                });
            }
            tracing::debug!(backend = %self.authority, connection = idle.id, "Discarding stale pooled connection");
        }

        let (id, sender) = self.connect().await?;
        Ok(PooledConnection {
            pool: self.clone(),
            id,
            sender: Some(sender),
            reused: false,
            _permit: permit,
        })
    }

    async fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>, GatewayError> {
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            return Ok(Some(permit));
        }

        let waiting = self.pending.fetch_add(1, Ordering::AcqRel);
        let _pending = PendingGuard(&self.pending);
        if waiting >= self.settings.max_pending {
            tracing::warn!(backend = %self.authority, pending = waiting, "Pending acquire queue full");
            return Err(GatewayError::PoolExhausted {
                addr: self.authority.clone(),
            });
        }

        match tokio::time::timeout(self.settings.acquire_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Some(permit)),
            Ok(Err(_)) => Err(GatewayError::Unexpected("connection pool closed".to_string())),
            Err(_) => match self.settings.acquire_timeout_action {
                AcquireTimeoutAction::Fail => {
                    tracing::warn!(backend = %self.authority, "Timed out waiting for a pooled connection");
                    Err(GatewayError::PoolExhausted {
                        addr: self.authority.clone(),
                    })
                }
                AcquireTimeoutAction::NewConnection => {
                    tracing::debug!(backend = %self.authority, "Acquire timed out, opening unpooled connection");
                    Ok(None)
                }
            },
        }
    }

    fn pop_idle(&self) -> Option<IdleConnection> {
        self.idle.lock().expect("pool mutex poisoned").pop_back()
    }

    /// Health check on acquire: closed, idle-expired and not-ready
    /// connections are rejected.
    async fn check_idle(&self, mut sender: Sender, idle_since: Instant) -> Option<Sender> {
        if sender.is_closed() || idle_since.elapsed() >= self.settings.idle_timeout {
            return None;
        }
        match tokio::time::timeout(self.settings.connect_timeout, sender.ready()).await {
            Ok(Ok(())) => Some(sender),
            _ => None,
        }
    }

    async fn connect(&self) -> Result<(u64, Sender), GatewayError> {
        let connect_failure = |reason: String| GatewayError::ConnectFailure {
            addr: self.authority.clone(),
            reason,
        };

        let stream = with_deadline(
            self.settings.connect_timeout,
            async {
                TcpStream::connect((self.host.as_str(), self.port))
                    .await
                    .map_err(|e| connect_failure(e.to_string()))
            },
            || connect_failure(format!("timed out after {:?}", self.settings.connect_timeout)),
        )
        .await?;
        let _ = stream.set_nodelay(true);

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| connect_failure(format!("handshake failed: {}", e)))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let authority = self.authority.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(backend = %authority, connection = id, error = %e, "Backend connection closed");
            }
        });

        metrics::record_pool_connection_created(&self.authority);
        tracing::debug!(backend = %self.authority, connection = id, "Opened backend connection");
        Ok((id, sender))
    }

    fn put_idle(&self, id: u64, sender: Sender) {
        if sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        idle.push_back(IdleConnection {
            id,
            sender,
            idle_since: Instant::now(),
        });
        // Never hold more idle connections than the pool bound.
        while idle.len() > self.settings.max_connections {
            idle.pop_front();
        }
    }

    /// Drop closed and idle-expired connections. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        let before = idle.len();
        let limit = self.settings.idle_timeout;
        idle.retain(|c| !c.sender.is_closed() && c.idle_since.elapsed() < limit);
        before - idle.len()
    }
}

/// A checked-out connection. Call [`PooledConnection::release`] after a
/// clean exchange; dropping it closes the connection.
#[derive(Debug)]
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    id: u64,
    sender: Option<Sender>,
    reused: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn sender_mut(&mut self) -> Option<&mut Sender> {
        self.sender.as_mut()
    }

    /// Return the connection to its pool for reuse.
    pub fn release(mut self) {
        if let Some(sender) = self.sender.take() {
            self.pool.put_idle(self.id, sender);
        }
    }
}

/// All pools, keyed by host:port.
#[derive(Debug)]
pub struct PoolRegistry {
    settings: PoolSettings,
    pools: DashMap<String, Arc<ConnectionPool>>,
}

impl PoolRegistry {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            pools: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, host: &str, port: u16) -> Arc<ConnectionPool> {
        let key = format!("{}:{}", host, port);
        if let Some(pool) = self.pools.get(&key) {
            return pool.clone();
        }
        self.pools
            .entry(key)
            .or_insert_with(|| Arc::new(ConnectionPool::new(host, port, self.settings.clone())))
            .clone()
    }

    pub fn get(&self, authority: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.get(authority).map(|p| p.clone())
    }

    pub fn evict_idle(&self) -> usize {
        self.pools.iter().map(|p| p.evict_idle()).sum()
    }

    /// Periodically evict idle connections until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle();
                    if evicted > 0 {
                        tracing::debug!(evicted, "Evicted idle backend connections");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pool sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
