//! Checked-out connection guard

use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;

use super::PoolInner;
use crate::client::Closeable;

/// A connection checked out of a [`Pool`](super::Pool)
///
/// Holds one of the pool's capacity slots until it is released, discarded
/// or dropped. Dropping the guard without releasing or discarding it frees
/// the slot but neither closes the connection nor returns it to the idle
/// set; the drop is logged and counted in [`Pool::leaked`](super::Pool::leaked).
pub struct PooledConnection<C: Closeable> {
    conn: Option<C>,
    // Dropped after `Drop::drop` runs, so the slot frees last
    _permit: OwnedSemaphorePermit,
    pool: Arc<PoolInner<C>>,
}

impl<C: Closeable> PooledConnection<C> {
    pub(super) fn new(conn: C, permit: OwnedSemaphorePermit, pool: Arc<PoolInner<C>>) -> Self {
        pool.outstanding.fetch_add(1, Ordering::AcqRel);
        Self {
            conn: Some(conn),
            _permit: permit,
            pool,
        }
    }

    /// Return the connection to the pool, or close it if the pool is closed
    pub async fn release(mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if let Some(mut conn) = self.pool.check_in(conn) {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close connection released after pool close");
            }
        }
    }

    /// Close the connection and give its slot back without reusing it
    pub async fn discard(mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close discarded connection");
            }
        }
    }
}

impl<C: Closeable> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection is present until the guard is consumed"))
    }
}

impl<C: Closeable> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("connection is present until the guard is consumed"))
    }
}

impl<C: Closeable> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            self.pool.leaked.fetch_add(1, Ordering::Relaxed);
            warn!("Pooled connection dropped without release or discard; it was not closed");
        }
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
