//! Fixed-size blocking connection pool.
//!
//! All connections are created up front and live as long as the pool. A
//! connection is either on the free list or held by exactly one [`Entry`];
//! nothing is created or destroyed after construction.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::config::Config;
use crate::connection::{Connection, ConnectionRef};
use crate::driver::Driver;
use crate::error::{Error, Result};

// ============================================================================
// Pool Inner
// ============================================================================

struct FreeList {
    conns: VecDeque<ConnectionRef>,
    /// Connections handed out and not yet returned
    checked_out: usize,
    waiters: usize,
}

struct PoolInner {
    /// Every connection owned by the pool, checked out or not
    members: Vec<ConnectionRef>,
    free: Mutex<FreeList>,
    available: Condvar,
}

impl PoolInner {
    /// Take a free connection, blocking until one is released.
    fn acquire(&self) -> ConnectionRef {
        let mut free = self.free.lock();
        loop {
            if let Some(conn) = free.conns.pop_front() {
                free.checked_out += 1;
                tracing::trace!(conn = conn.id(), "connection checked out");
                return conn;
            }

            free.waiters += 1;
            self.available.wait(&mut free);
            free.waiters -= 1;
        }
    }

    fn release(&self, conn: ConnectionRef) {
        let mut free = self.free.lock();
        tracing::trace!(conn = conn.id(), "connection returned");

        // Any free connection is as good as another; front keeps recently
        // used sessions warm.
        free.conns.push_front(conn);
        free.checked_out -= 1;

        if free.waiters > 0 {
            self.available.notify_one();
        }
    }
}

// ============================================================================
// Checkout guard
// ============================================================================

/// Exclusive use of one pooled connection for the guard's lifetime.
///
/// Dropping the entry puts the connection back on the free list and wakes
/// one waiting thread. A default entry holds nothing and returns nothing.
#[derive(Default)]
pub struct Entry {
    pool: Option<Arc<PoolInner>>,
    conn: Option<ConnectionRef>,
}

impl Entry {
    /// Block until a connection of `pool` is free and take it.
    pub fn new(pool: &Pool) -> Self {
        pool.checkout().1
    }

    /// The checked-out connection, `None` for an empty entry.
    pub fn connection(&self) -> Option<&ConnectionRef> {
        self.conn.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.conn.is_none()
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        if let (Some(pool), Some(conn)) = (self.pool.take(), self.conn.take()) {
            pool.release(conn);
        }
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("conn", &self.conn.as_ref().map(|c| c.id()))
            .finish()
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

/// Snapshot of the pool's free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections on the free list.
    pub available: usize,
    /// Connections held by entries, counted on checkout and return.
    pub in_use: usize,
    /// Fixed pool size.
    pub total: usize,
    /// Threads blocked in acquire.
    pub waiters: usize,
}

/// A fixed set of connections shared between threads.
///
/// Checkouts block without timeout while every connection is in use.
/// Cloning the pool yields another handle to the same connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create `size` unconnected connections.
    pub fn new(driver: &dyn Driver, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("pool size must be at least 1".to_string()));
        }

        let members = (0..size)
            .map(|_| Connection::new(driver).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let inner = Arc::new(PoolInner {
            free: Mutex::new(FreeList {
                conns: members.iter().cloned().collect(),
                checked_out: 0,
                waiters: 0,
            }),
            available: Condvar::new(),
            members,
        });

        Ok(Self { inner })
    }

    /// Connect every member in turn.
    ///
    /// Stops at the first failure; the pool is then partially connected
    /// and should be treated as unusable.
    pub fn connect(&self, config: &Config, use_database: bool) -> Result<()> {
        for conn in &self.inner.members {
            conn.connect(config, use_database)?;
        }
        tracing::info!(size = self.inner.members.len(), "connection pool connected");
        Ok(())
    }

    /// Check out a connection, blocking until one is free.
    pub fn get(&self) -> Entry {
        Entry::new(self)
    }

    pub(crate) fn checkout(&self) -> (ConnectionRef, Entry) {
        let conn = self.inner.acquire();
        let entry = Entry {
            pool: Some(Arc::clone(&self.inner)),
            conn: Some(Arc::clone(&conn)),
        };
        (conn, entry)
    }

    pub fn size(&self) -> usize {
        self.inner.members.len()
    }

    /// All connections owned by the pool.
    pub fn connections(&self) -> &[ConnectionRef] {
        &self.inner.members
    }

    pub fn status(&self) -> PoolStatus {
        let free = self.inner.free.lock();
        PoolStatus {
            available: free.conns.len(),
            in_use: free.checked_out,
            total: self.inner.members.len(),
            waiters: free.waiters,
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("status", &self.status()).finish()
    }
}
