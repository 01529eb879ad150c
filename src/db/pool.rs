//! Bounded connection pool over single-file SQLite connections.
//!
//! Request handlers and background threads share one pool. Every handed-out
//! connection is tracked with its holder and acquisition time so that
//! long-held connections can be reported by the leak watchdog. Reporting only:
//! the pool never takes a connection back from its holder.

use chrono::{DateTime, Local};
use derive_more::Display;
use serde::Serialize;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{HrError, HrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[display(fmt = "conn-{}", _0)]
pub struct ConnectionId(u64);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub leak_threshold: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            leak_threshold: Duration::from_secs(300),
        }
    }
}

/// A connection checked out of the pool. Hand it back with
/// [`ConnectionPool::release`]; dropping it instead gives the slot back
/// without reusing the connection.
#[derive(Debug)]
pub struct PooledConnection {
    lease: Lease,
    conn: SqliteConnection,
}

impl PooledConnection {
    pub fn id(&self) -> ConnectionId {
        self.lease.id
    }
}

impl Deref for PooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

struct ActiveEntry {
    holder: String,
    acquired_at: Instant,
    acquired_wall: DateTime<Local>,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<(ConnectionId, SqliteConnection)>,
    active: HashMap<ConnectionId, ActiveEntry>,
    size: usize,
}

struct Shared {
    state: Mutex<PoolState>,
    released: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Claim on one unit of pool capacity. Armed until the connection is handed
/// back through `release`; an armed lease frees its slot when dropped, which
/// covers cancelled holders and connections that never finished opening.
struct Lease {
    id: ConnectionId,
    shared: Arc<Shared>,
    armed: bool,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("id", &self.id).field("armed", &self.armed).finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let freed = {
            let mut state = self.shared.lock();
            let tracked = state.active.remove(&self.id).is_some();
            if tracked {
                state.size = state.size.saturating_sub(1);
            }
            tracked
        };
        if freed {
            warn!(connection = %self.id, "Connection dropped without release, slot freed");
        }
        self.shared.released.notify_one();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub max_size: usize,
    pub size: usize,
    pub idle: usize,
    pub active: usize,
    pub total_created: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeakReport {
    pub connection_id: ConnectionId,
    pub holder: String,
    pub acquired_at: String,
    pub held_secs: u64,
}

enum Slot {
    Ready(PooledConnection),
    Create(Lease),
    Wait,
}

pub struct ConnectionPool {
    options: SqliteConnectOptions,
    config: PoolConfig,
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

fn current_holder() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

impl ConnectionPool {
    pub fn new(options: SqliteConnectOptions, config: PoolConfig) -> Self {
        Self {
            options,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::default()),
                released: Notify::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lease(&self, id: ConnectionId) -> Lease {
        Lease {
            id,
            shared: Arc::clone(&self.shared),
            armed: true,
        }
    }

    pub async fn acquire(&self) -> HrResult<PooledConnection> {
        self.acquire_timeout(self.config.acquire_timeout).await
    }

    /// Idle connection first, then a new one while below capacity, otherwise
    /// wait for a release until `timeout` runs out.
    pub async fn acquire_timeout(&self, timeout: Duration) -> HrResult<PooledConnection> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Registered before inspecting the state so a release in between is not missed.
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let slot = {
                let mut state = self.shared.lock();
                let entry = ActiveEntry {
                    holder: current_holder(),
                    acquired_at: Instant::now(),
                    acquired_wall: Local::now(),
                };
                if let Some((id, conn)) = state.idle.pop_front() {
                    state.active.insert(id, entry);
                    Slot::Ready(PooledConnection {
                        lease: self.lease(id),
                        conn,
                    })
                } else if state.size < self.config.max_size {
                    let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    state.size += 1;
                    state.active.insert(id, entry);
                    Slot::Create(self.lease(id))
                } else {
                    Slot::Wait
                }
            };

            match slot {
                Slot::Ready(conn) => {
                    debug!(connection = %conn.id(), "Reusing idle connection");
                    return Ok(conn);
                }
                Slot::Create(lease) => return self.open(lease).await,
                Slot::Wait => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        let waited = started.elapsed();
                        warn!(?waited, max_size = self.config.max_size, "Connection pool exhausted");
                        return Err(HrError::PoolExhausted { waited });
                    }
                }
            }
        }
    }

    /// Opens the connection for a reserved slot. The lease gives the slot
    /// back if opening fails or the caller goes away mid-connect.
    async fn open(&self, mut lease: Lease) -> HrResult<PooledConnection> {
        match self.options.connect().await {
            Ok(conn) => {
                debug!(connection = %lease.id, "Opened new connection");
                Ok(PooledConnection { lease, conn })
            }
            Err(e) => {
                let id = lease.id;
                {
                    let mut state = self.shared.lock();
                    if state.active.remove(&id).is_some() {
                        state.size = state.size.saturating_sub(1);
                    }
                }
                lease.armed = false;
                self.shared.released.notify_one();
                tracing::error!(error = %e, connection = %id, "Failed to open connection");
                Err(HrError::ConnectionCreateFailed(e))
            }
        }
    }

    /// Returns a connection to the idle set after a liveness probe. A dead
    /// connection is discarded and its capacity freed.
    pub async fn release(&self, pooled: PooledConnection) {
        let PooledConnection { mut lease, mut conn } = pooled;
        let id = lease.id;

        // The slot stays claimed during the probe so a cancelled release still frees it.
        let alive = conn.ping().await;
        lease.armed = false;

        let discard = {
            let mut state = self.shared.lock();
            if state.active.remove(&id).is_none() {
                // The pool was reset while this connection was out.
                debug!(connection = %id, "Closing connection released after pool reset");
                Some(conn)
            } else if let Err(e) = alive {
                warn!(error = %e, connection = %id, "Connection failed liveness probe, discarding");
                state.size = state.size.saturating_sub(1);
                Some(conn)
            } else {
                state.idle.push_back((id, conn));
                None
            }
        };
        self.shared.released.notify_one();

        if let Some(conn) = discard {
            if let Err(e) = conn.close().await {
                debug!(error = %e, connection = %id, "Close of discarded connection failed");
            }
        }
    }

    /// Closes every idle connection and forgets the active ones; size drops to
    /// zero. Outstanding connections are closed when they come back.
    pub async fn close_all(&self) -> usize {
        let (idle, forgotten) = {
            let mut state = self.shared.lock();
            let idle: Vec<_> = state.idle.drain(..).collect();
            let forgotten = state.active.len();
            state.active.clear();
            state.size = 0;
            (idle, forgotten)
        };

        let closed = idle.len();
        for (id, conn) in idle {
            if let Err(e) = conn.close().await {
                warn!(error = %e, connection = %id, "Failed to close idle connection");
            }
        }
        self.shared.released.notify_waiters();

        info!(closed, forgotten, "Connection pool closed");
        closed + forgotten
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            max_size: self.config.max_size,
            size: state.size,
            idle: state.idle.len(),
            active: state.active.len(),
            total_created: self.next_id.load(Ordering::Relaxed) - 1,
        }
    }

    /// Connections held for longer than `threshold`.
    pub fn check_leaks(&self, threshold: Duration) -> Vec<LeakReport> {
        let state = self.shared.lock();
        let mut leaks: Vec<LeakReport> = state
            .active
            .iter()
            .filter(|(_, entry)| entry.acquired_at.elapsed() >= threshold)
            .map(|(id, entry)| LeakReport {
                connection_id: *id,
                holder: entry.holder.clone(),
                acquired_at: entry.acquired_wall.format("%Y-%m-%d %H:%M:%S").to_string(),
                held_secs: entry.acquired_at.elapsed().as_secs(),
            })
            .collect();
        drop(state);

        leaks.sort_by(|a, b| b.held_secs.cmp(&a.held_secs));
        for leak in &leaks {
            warn!(
                connection = %leak.connection_id,
                holder = %leak.holder,
                held_secs = leak.held_secs,
                "Possible connection leak"
            );
        }
        leaks
    }

    /// Leak check against the configured threshold.
    pub fn check_configured_leaks(&self) -> Vec<LeakReport> {
        self.check_leaks(self.config.leak_threshold)
    }
}
