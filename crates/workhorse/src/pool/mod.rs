//! Bounded connection pool
//!
//! Connections are created lazily through a factory, handed out as
//! [`PooledConnection`] guards and returned with
//! [`release`](PooledConnection::release). A semaphore caps the number of
//! simultaneously outstanding connections; `get` waits for a free slot when
//! the pool is at capacity.
//!
//! ```text
//!  get() ──► slot (semaphore) ──► idle connection? ──yes──► guard
//!                                        │
//!                                        no ──► factory() ──► guard
//!
//!  release(guard) ──► pool open?  ──yes──► idle set
//!                          │
//!                          no ──► close()
//! ```
//!
//! The pool never checks connection health. A caller that finds its
//! connection broken should [`discard`](PooledConnection::discard) it
//! rather than release it. Dropping a guard frees its slot without closing
//! the connection; such drops are logged and counted as
//! [`leaked`](Pool::leaked).

mod connection;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::client::{ClientError, Closeable};

pub use connection::PooledConnection;

/// Factory used to open new connections
pub type ConnectionFactory<C> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<C, ClientError>> + Send + Sync>;

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool has been closed
    #[error("pool closed")]
    Closed,

    /// The factory failed to open a connection
    #[error("failed to open connection: {0}")]
    Connect(#[source] ClientError),

    /// An operation on a checked-out connection failed
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Capacity must be at least one
    #[error("invalid pool capacity: {0}")]
    InvalidCapacity(usize),
}

pub(crate) struct PoolInner<C> {
    idle: Mutex<VecDeque<C>>,
    slots: Arc<Semaphore>,
    capacity: usize,
    closed: AtomicBool,
    created: AtomicUsize,
    outstanding: AtomicUsize,
    leaked: AtomicUsize,
    factory: ConnectionFactory<C>,
}

impl<C: Closeable> PoolInner<C> {
    /// Put a connection back, or hand it back to the caller if the pool is closed.
    ///
    /// The closed check and the push happen under the idle lock so a
    /// concurrent `close` cannot miss the connection.
    fn check_in(&self, conn: C) -> Option<C> {
        let mut idle = self.idle.lock();
        if self.closed.load(Ordering::Acquire) {
            return Some(conn);
        }
        idle.push_back(conn);
        None
    }
}

/// Size-bounded pool of reusable connections
///
/// Cloning is cheap; clones share the same connections.
pub struct Pool<C: Closeable> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Closeable> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Closeable> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.inner.capacity)
            .field("idle", &self.idle_count())
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: Closeable> Pool<C> {
    /// Create a pool holding at most `capacity` connections
    pub fn new(capacity: usize, factory: ConnectionFactory<C>) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::InvalidCapacity(capacity));
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(VecDeque::with_capacity(capacity)),
                slots: Arc::new(Semaphore::new(capacity)),
                capacity,
                closed: AtomicBool::new(false),
                created: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                leaked: AtomicUsize::new(0),
                factory,
            }),
        })
    }

    /// Create a pool from an async closure
    pub fn from_fn<F, Fut>(capacity: usize, factory: F) -> Result<Self, PoolError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, ClientError>> + Send + 'static,
    {
        let factory: ConnectionFactory<C> = Arc::new(move || Box::pin(factory()));
        Self::new(capacity, factory)
    }

    /// Check out a connection
    ///
    /// Reuses an idle connection when one exists, otherwise opens a new one.
    /// Waits while `capacity` connections are already checked out. Fails
    /// with [`PoolError::Closed`] once the pool is closed, including for
    /// callers that were waiting at the time.
    pub async fn get(&self) -> Result<PooledConnection<C>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = Arc::clone(&self.inner.slots)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let reused = self.inner.idle.lock().pop_front();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = (self.inner.factory)().await.map_err(PoolError::Connect)?;
                let created = self.inner.created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(created, capacity = self.inner.capacity, "Opened pooled connection");
                conn
            }
        };

        Ok(PooledConnection::new(conn, permit, Arc::clone(&self.inner)))
    }

    /// Return a connection to the pool
    pub async fn release(&self, conn: PooledConnection<C>) {
        conn.release().await;
    }

    /// Check out a connection, run `op` on it, and check it back in
    ///
    /// Connection-level failures discard the connection instead of
    /// returning it. Every error, including pool errors, goes back to the
    /// caller.
    pub async fn with<T, F>(&self, op: F) -> Result<T, PoolError>
    where
        F: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, Result<T, ClientError>>,
    {
        let mut conn = self.get().await?;
        let result = op(&mut *conn).await;

        match result {
            Ok(value) => {
                conn.release().await;
                Ok(value)
            }
            Err(err) if err.is_connection_error() => {
                conn.discard().await;
                Err(err.into())
            }
            Err(err) => {
                conn.release().await;
                Err(err.into())
            }
        }
    }

    /// Close the pool
    ///
    /// Closes every idle connection now; connections still checked out are
    /// closed when they are released. Returns `false` if the pool was
    /// already closed.
    pub async fn close(&self) -> bool {
        let drained: Vec<C> = {
            let mut idle = self.inner.idle.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            idle.drain(..).collect()
        };
        self.inner.slots.close();

        debug!(
            idle = drained.len(),
            outstanding = self.outstanding(),
            "Closing connection pool"
        );

        for mut conn in drained {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close pooled connection");
            }
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Connections currently idle in the pool
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Connections currently checked out
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Guards dropped while still holding an unclosed connection
    pub fn leaked(&self) -> usize {
        self.inner.leaked.load(Ordering::Relaxed)
    }

    /// Connections opened over the pool's lifetime
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct TestConn {
        id: usize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Closeable for TestConn {
        async fn close(&mut self) -> Result<(), ClientError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_pool(capacity: usize) -> (Pool<TestConn>, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let next_id = Arc::new(AtomicUsize::new(0));
        let closed_counter = Arc::clone(&closed);
        let pool = Pool::from_fn(capacity, move || {
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            let closed = Arc::clone(&closed_counter);
            async move { Ok(TestConn { id, closed }) }
        })
        .unwrap();
        (pool, closed)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = Pool::<TestConn>::from_fn(0, || async {
            Err(ClientError::Connection("unused".into()))
        });
        assert!(matches!(result, Err(PoolError::InvalidCapacity(0))));
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let (pool, _) = test_pool(2);

        let conn = pool.get().await.unwrap();
        let first_id = conn.id;
        pool.release(conn).await;

        let conn = pool.get().await.unwrap();
        assert_eq!(conn.id, first_id);
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_get_waits_at_capacity() {
        let (pool, _) = test_pool(1);
        let held = pool.get().await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(50), pool.get()).await;
        assert!(waiting.is_err(), "get should block while the only slot is taken");

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        held.release().await;

        let id = waiter.await.unwrap().unwrap();
        assert_eq!(id, 0);
        assert_eq!(pool.created(), 1);
    }

    #[tokio::test]
    async fn test_factory_error_frees_slot() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let closed = Arc::new(AtomicUsize::new(0));
        let pool = Pool::from_fn(1, move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let closed = Arc::clone(&closed);
            async move {
                if attempt == 0 {
                    Err(ClientError::Connection("refused".into()))
                } else {
                    Ok(TestConn { id: attempt, closed })
                }
            }
        })
        .unwrap();

        assert!(matches!(pool.get().await, Err(PoolError::Connect(_))));
        let conn = pool.get().await.unwrap();
        assert_eq!(conn.id, 1);
    }

    #[tokio::test]
    async fn test_close_closes_idle_and_rejects_get() {
        let (pool, closed) = test_pool(3);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        a.release().await;
        b.release().await;

        assert!(pool.close().await);
        assert!(!pool.close().await);

        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.get().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_release_after_close_closes_connection() {
        let (pool, closed) = test_pool(2);
        let conn = pool.get().await.unwrap();

        pool.close().await;
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        conn.release().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let (pool, _) = test_pool(1);
        let _held = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.close().await;

        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_dropped_guard_frees_slot_without_reuse() {
        let (pool, closed) = test_pool(1);
        let conn = pool.get().await.unwrap();
        drop(conn);

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.leaked(), 1);

        let conn = pool.get().await.unwrap();
        assert_eq!(conn.id, 1);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_release_and_discard_are_not_leaks() {
        let (pool, closed) = test_pool(2);
        let kept = pool.get().await.unwrap();
        let broken = pool.get().await.unwrap();

        pool.release(kept).await;
        broken.discard().await;

        assert_eq!(pool.leaked(), 0);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_discards_on_connection_error() {
        let (pool, closed) = test_pool(1);

        let result: Result<(), PoolError> = pool
            .with(|_conn| Box::pin(async { Err(ClientError::Connection("reset".into())) }))
            .await;
        assert!(matches!(result, Err(PoolError::Client(ClientError::Connection(_)))));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);

        let id = pool
            .with(|conn| Box::pin(async move { Ok(conn.id) }))
            .await
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_with_keeps_connection_on_server_error() {
        let (pool, closed) = test_pool(1);

        let result: Result<(), PoolError> = pool
            .with(|_conn| Box::pin(async { Err(ClientError::Server("ERR".into())) }))
            .await;

        assert!(result.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_with_after_close_propagates() {
        let (pool, _) = test_pool(1);
        pool.close().await;

        let result = pool.with(|conn| Box::pin(async move { Ok(conn.id) })).await;
        assert!(matches!(result, Err(PoolError::Closed)));
    }
}
