//! Bounded connection pool, one per [`ConnectionKey`].
//!
//! Resource-safety contract:
//! - at most `max_size` connections are lent out concurrently; a borrow
//!   beyond the bound blocks up to the caller's timeout, then fails with
//!   `PoolExhausted` instead of queueing forever;
//! - borrow/release pairs are strictly balanced: releases happen through
//!   the [`PooledConnection`] guard's `Drop`, so a cancelled execution that
//!   drops its guard returns the connection rather than leaking it;
//! - soft eviction only ever touches currently-idle members, so it can
//!   never invalidate a connection an active request is using.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use meridian_error::{ErrorCode, ErrorContext, MeridianError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::connection::{ConnectionOpener, LiveConnection};
use crate::credential::CredentialProvider;
use crate::key::ConnectionKey;

/// Point-in-time statistics for one pool.
///
/// `total == active + idle` at any observation point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub user: String,
    pub driver: String,
    pub active: usize,
    pub idle: usize,
    pub total: usize,
    pub max_size: usize,
    pub last_accessed_epoch_ms: u64,
}

struct PoolState {
    idle: Vec<Box<dyn LiveConnection>>,
    active: usize,
    closed: bool,
}

/// A bounded pool of live connections sharing one [`ConnectionKey`].
///
/// Created lazily by the registry on first request for its key; destroyed
/// only by explicit removal. `max_size` is fixed at creation time.
pub struct ConnectionPool {
    name: String,
    key: ConnectionKey,
    url: String,
    driver: &'static str,
    user: String,
    max_size: usize,
    opener: Arc<dyn ConnectionOpener>,
    credentials: Arc<dyn CredentialProvider>,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    last_accessed: AtomicU64,
}

impl ConnectionPool {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: ConnectionKey,
        url: String,
        driver: &'static str,
        user: &str,
        max_size: usize,
        opener: Arc<dyn ConnectionOpener>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: key.short_id(),
            key,
            url,
            driver,
            user: user.to_string(),
            max_size,
            opener,
            credentials,
            permits: Arc::new(Semaphore::new(max_size)),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                active: 0,
                closed: false,
            }),
            last_accessed: AtomicU64::new(epoch_ms()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Borrow a connection, blocking up to `timeout` for a free slot.
    ///
    /// The returned guard releases the slot and returns the connection to
    /// the idle set when dropped, whether the execution completed or was
    /// cancelled.
    pub async fn borrow(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection> {
        let permit = match tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(_) => return Err(self.exhausted_error(timeout)),
        };

        let existing = {
            let mut state = lock_state(&self.state);
            if state.closed {
                return Err(self.closed_error());
            }
            state.idle.pop()
        };

        let conn = match existing {
            Some(conn) => conn,
            // Slot acquired but no idle member: open a fresh connection.
            // On failure the permit drops with this frame, freeing the slot.
            None => {
                let credential = self.credentials.resolve(self.key.auth()).await?;
                self.opener
                    .open(&self.url, &credential)
                    .await
                    .map_err(|e| {
                        MeridianError::new(
                            ErrorCode::ConnectionFailed,
                            format!("Failed to open connection for pool '{}': {}", self.name, e),
                        )
                        .with_context(ErrorContext::Pool {
                            pool: self.name.clone(),
                            vendor: Some(self.driver.to_string()),
                            active: None,
                            max_size: Some(self.max_size),
                        })
                    })?
            }
        };

        {
            let mut state = lock_state(&self.state);
            state.active += 1;
        }
        self.touch();
        debug!(pool = %self.name, "Borrowed connection");

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Close currently-idle connections only, leaving active ones
    /// untouched. Returns `(evicted, remaining_active)`.
    pub async fn soft_evict(&self) -> (usize, usize) {
        let (drained, active) = {
            let mut state = lock_state(&self.state);
            let drained: Vec<_> = state.idle.drain(..).collect();
            (drained, state.active)
        };

        let evicted = drained.len();
        for conn in drained {
            if let Err(e) = conn.close().await {
                warn!(pool = %self.name, error = %e, "Failed to close evicted connection");
            }
        }

        debug!(pool = %self.name, evicted, active, "Soft-evicted idle connections");
        (evicted, active)
    }

    /// Forcibly close everything and refuse further borrows.
    ///
    /// Idle connections are closed here; connections currently lent out are
    /// dropped (not re-pooled) when their guards release, so active
    /// requests are never invalidated mid-flight.
    pub(crate) async fn close_all(&self) {
        self.permits.close();
        let drained: Vec<_> = {
            let mut state = lock_state(&self.state);
            state.closed = true;
            state.idle.drain(..).collect()
        };

        for conn in drained {
            if let Err(e) = conn.close().await {
                warn!(pool = %self.name, error = %e, "Failed to close connection on removal");
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = lock_state(&self.state);
        PoolStats {
            name: self.name.clone(),
            user: self.user.clone(),
            driver: self.driver.to_string(),
            active: state.active,
            idle: state.idle.len(),
            total: state.active + state.idle.len(),
            max_size: self.max_size,
            last_accessed_epoch_ms: self.last_accessed.load(Ordering::Relaxed),
        }
    }

    fn touch(&self) {
        self.last_accessed.store(epoch_ms(), Ordering::Relaxed);
    }

    fn exhausted_error(&self, timeout: Duration) -> MeridianError {
        let stats = self.stats();
        MeridianError::new(
            ErrorCode::PoolExhausted,
            format!(
                "Timed out after {:?} waiting for a connection from pool '{}'",
                timeout, self.name
            ),
        )
        .with_context(ErrorContext::Pool {
            pool: self.name.clone(),
            vendor: Some(self.driver.to_string()),
            active: Some(stats.active),
            max_size: Some(self.max_size),
        })
        .with_hint("All connections are busy; retry with backoff or raise the pool size")
    }

    fn closed_error(&self) -> MeridianError {
        MeridianError::new(
            ErrorCode::PoolClosed,
            format!("Pool '{}' has been removed", self.name),
        )
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("active", &stats.active)
            .field("idle", &stats.idle)
            .field("max_size", &self.max_size)
            .finish()
    }
}

/// RAII borrow guard. Dropping it returns the connection to the pool's
/// idle set and frees the borrow slot.
pub struct PooledConnection {
    conn: Option<Box<dyn LiveConnection>>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// The underlying live connection.
    ///
    /// The option is only empty after `Drop` has run, which the borrow
    /// checker makes unreachable from here.
    pub fn connection(&self) -> &dyn LiveConnection {
        self.conn
            .as_deref()
            .expect("borrow guard used after release")
    }

    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut state = lock_state(&self.pool.state);
            state.active = state.active.saturating_sub(1);
            if state.closed {
                // Pool was removed while this connection was lent out;
                // drop the connection instead of re-pooling it.
                drop(conn);
            } else {
                state.idle.push(conn);
            }
        }
        self.pool.touch();
    }
}

fn lock_state(state: &Mutex<PoolState>) -> std::sync::MutexGuard<'_, PoolState> {
    // Critical sections never hold the lock across await points, so a
    // poisoned lock means a panic mid-bookkeeping; recover the guard and
    // carry on rather than cascading the panic.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
