//! ConnectionPool: long-lived automation sessions keyed by device id.
//!
//! # Retry law
//!
//! [`ConnectionPool::execute`] wraps every pooled action the same way:
//!
//! ```text
//! attempt 1: get_or_create(key) ─► action ──ok──► return
//!                                    │ err (creation or action)
//!                                    ▼
//!            destroy(key), get_or_create(key) ─► action ──ok──► return
//!                                                  │ err
//!                                                  ▼
//!                                   destroy(key), return the second error
//! ```
//!
//! A connection that has failed once is never handed out again, and recovery
//! is bounded to a single retry.
//!
//! # Per-key slots
//!
//! Each key owns a slot: an async mutex around an optional connection.  The
//! slot lock is held while a connection is being created, so two callers
//! asking for the same key at once get the same connection rather than two.
//!
//! Destroying a key (or failing to create its connection) removes the slot
//! from the map while its lock is held.  A caller that was queued on that
//! slot notices it is no longer the map's slot and starts over with a fresh
//! one, so a key never ends up with two live connections.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Error type for pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create connection for {key}: {source:#}")]
    Create { key: String, source: anyhow::Error },

    #[error("action on {key} failed: {source:#}")]
    Action { key: String, source: anyhow::Error },
}

impl PoolError {
    pub fn key(&self) -> &str {
        match self {
            PoolError::Create { key, .. } | PoolError::Action { key, .. } => key,
        }
    }
}

/// A connection the pool can own.
#[async_trait]
pub trait PooledConnection: Send + Sync + 'static {
    /// Releases the connection.  Called once, when the pool destroys it.
    async fn close(&self);
}

/// Creates connections on demand.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: PooledConnection;

    async fn create(&self, key: &str) -> anyhow::Result<Self::Connection>;
}

type Slot<C> = Arc<Mutex<Option<Arc<C>>>>;

/// Keyed cache of connections with pool-owned destroy-and-retry.
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    slots: Arc<DashMap<String, Slot<F::Connection>>>,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F) -> Self {
        Self::with_slots(factory, Arc::new(DashMap::new()))
    }

    /// Builds a pool over an existing (possibly shared) slot map.
    pub fn with_slots(factory: F, slots: Arc<DashMap<String, Slot<F::Connection>>>) -> Self {
        Self { factory, slots }
    }

    /// Returns the live connection for `key`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Create`] if the factory fails; the key stays
    /// absent.
    pub async fn get_or_create(&self, key: &str) -> Result<Arc<F::Connection>, PoolError> {
        loop {
            let slot = self.slot(key);
            let mut guard = slot.lock().await;
            if !self.is_current(key, &slot) {
                // Destroyed while we were queued on it.
                continue;
            }
            if let Some(conn) = guard.as_ref() {
                return Ok(Arc::clone(conn));
            }

            debug!("pool: creating connection for {key}");
            return match self.factory.create(key).await {
                Ok(conn) => {
                    let conn = Arc::new(conn);
                    *guard = Some(Arc::clone(&conn));
                    Ok(conn)
                }
                Err(source) => {
                    self.remove_slot(key, &slot);
                    Err(PoolError::Create {
                        key: key.to_string(),
                        source,
                    })
                }
            };
        }
    }

    /// Closes the connection for `key` and removes its entry.  Missing keys
    /// are fine.
    pub async fn destroy(&self, key: &str) {
        let slot = match self.slots.get(key) {
            Some(slot) => Arc::clone(slot.value()),
            None => return,
        };
        let mut guard = slot.lock().await;
        let taken = guard.take();
        self.remove_slot(key, &slot);
        drop(guard);

        if let Some(conn) = taken {
            debug!("pool: destroying connection for {key}");
            conn.close().await;
        }
    }

    /// `true` if `key` currently has a live connection.
    pub async fn contains(&self, key: &str) -> bool {
        let slot = match self.slots.get(key) {
            Some(slot) => Arc::clone(slot.value()),
            None => return false,
        };
        let live = slot.lock().await.is_some();
        live
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot<F::Connection>> =
            self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        let mut live = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                live += 1;
            }
        }
        live
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Runs `action` against the connection for `key` with one retry on a
    /// fresh connection.  See the module docs for the exact law.
    ///
    /// # Errors
    ///
    /// Returns the second attempt's error; the key is left absent.
    pub async fn execute<T, A, Fut>(&self, key: &str, mut action: A) -> Result<T, PoolError>
    where
        A: FnMut(Arc<F::Connection>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match self.attempt(key, &mut action).await {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!("pool: {first}; recreating connection and retrying once");
                self.destroy(key).await;
                match self.attempt(key, &mut action).await {
                    Ok(value) => Ok(value),
                    Err(second) => {
                        self.destroy(key).await;
                        Err(second)
                    }
                }
            }
        }
    }

    async fn attempt<T, A, Fut>(&self, key: &str, action: &mut A) -> Result<T, PoolError>
    where
        A: FnMut(Arc<F::Connection>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let conn = self.get_or_create(key).await?;
        action(conn).await.map_err(|source| PoolError::Action {
            key: key.to_string(),
            source,
        })
    }

    fn is_current(&self, key: &str, slot: &Slot<F::Connection>) -> bool {
        self.slots
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current.value(), slot))
    }

    /// Removes `slot` from the map unless a newer slot already replaced it.
    fn remove_slot(&self, key: &str, slot: &Slot<F::Connection>) {
        self.slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }

    fn slot(&self, key: &str) -> Slot<F::Connection> {
        Arc::clone(
            self.slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    // ── Test doubles ──────────────────────────────────────────────────────────

    struct FakeConnection {
        serial: usize,
        closed: AtomicBool,
    }

    #[async_trait]
    impl PooledConnection for FakeConnection {
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        fail_creates: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ConnectionFactory for Arc<CountingFactory> {
        type Connection = FakeConnection;

        async fn create(&self, _key: &str) -> anyhow::Result<FakeConnection> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_creates.load(Ordering::SeqCst) > 0 {
                self.fail_creates.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("device offline");
            }
            let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FakeConnection {
                serial,
                closed: AtomicBool::new(false),
            })
        }
    }

    fn pool() -> (ConnectionPool<Arc<CountingFactory>>, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        (ConnectionPool::new(Arc::clone(&factory)), factory)
    }

    // ── get_or_create / destroy ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_get_or_create_reuses_live_connection() {
        let (pool, factory) = pool();

        let a = pool.get_or_create("A").await.unwrap();
        let b = pool.get_or_create("A").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(pool.contains("A").await);
    }

    #[tokio::test]
    async fn test_destroy_closes_and_tolerates_missing_key() {
        // Arrange
        let (pool, _) = pool();
        let conn = pool.get_or_create("A").await.unwrap();

        // Act
        pool.destroy("A").await;
        pool.destroy("A").await;
        pool.destroy("never-seen").await;

        // Assert
        assert!(conn.closed.load(Ordering::SeqCst));
        assert!(!pool.contains("A").await);
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_creation() {
        // Arrange
        let factory = Arc::new(CountingFactory {
            delay: Some(Duration::from_millis(20)),
            ..CountingFactory::default()
        });
        let pool = Arc::new(ConnectionPool::new(Arc::clone(&factory)));

        // Act
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.get_or_create("A").await.map(|c| c.serial) })
            })
            .collect();
        let mut serials = Vec::new();
        for task in tasks {
            serials.push(task.await.unwrap().unwrap());
        }

        // Assert
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(serials.iter().all(|s| *s == 1));
    }

    #[tokio::test]
    async fn test_destroy_removes_the_entry() {
        // Arrange
        let (pool, _) = pool();
        pool.get_or_create("A").await.unwrap();
        pool.get_or_create("B").await.unwrap();

        // Act
        pool.destroy("A").await;

        // Assert
        assert_eq!(pool.slots.len(), 1);
        assert!(pool.slots.get("A").is_none());
    }

    #[tokio::test]
    async fn test_failed_creation_leaves_no_entry() {
        let (pool, factory) = pool();
        factory.fail_creates.store(1, Ordering::SeqCst);

        let result = pool.get_or_create("A").await;

        assert!(matches!(result, Err(PoolError::Create { .. })));
        assert!(pool.slots.is_empty());
    }

    #[tokio::test]
    async fn test_caller_queued_on_destroyed_slot_gets_fresh_connection() {
        // Arrange: a slow creation holds the slot while a destroy and then a
        // second caller queue behind it.
        let factory = Arc::new(CountingFactory {
            delay: Some(Duration::from_millis(50)),
            ..CountingFactory::default()
        });
        let pool = Arc::new(ConnectionPool::new(Arc::clone(&factory)));
        let spawn_get = |pool: Arc<ConnectionPool<Arc<CountingFactory>>>| {
            tokio::spawn(async move { pool.get_or_create("A").await.map(|c| c.serial) })
        };

        // Act
        let first = spawn_get(Arc::clone(&pool));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let destroy = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.destroy("A").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = spawn_get(Arc::clone(&pool));

        let first = first.await.unwrap().unwrap();
        destroy.await.unwrap();
        let second = second.await.unwrap().unwrap();

        // Assert
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.slots.len(), 1);
        assert_eq!(pool.len().await, 1);
    }

    // ── Retry law ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_execute_retries_once_on_fresh_connection() {
        // Arrange
        let (pool, factory) = pool();
        let first = pool.get_or_create("A").await.unwrap();

        // Act: fails on connection #1, succeeds on #2.
        let result = pool
            .execute("A", |conn| async move {
                if conn.serial == 1 {
                    anyhow::bail!("socket reset");
                }
                Ok(conn.serial)
            })
            .await;

        // Assert
        assert_eq!(result.unwrap(), 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert!(first.closed.load(Ordering::SeqCst));
        assert!(pool.contains("A").await);
    }

    #[tokio::test]
    async fn test_execute_second_failure_propagates_and_leaves_key_absent() {
        // Arrange
        let (pool, factory) = pool();
        let attempts = Arc::new(AtomicUsize::new(0));

        // Act
        let counter = Arc::clone(&attempts);
        let result: Result<(), PoolError> = pool
            .execute("A", move |conn| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("failure on connection {}", conn.serial)
                }
            })
            .await;

        // Assert
        let err = result.unwrap_err();
        assert!(matches!(err, PoolError::Action { .. }));
        assert!(err.to_string().contains("failure on connection 2"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert!(!pool.contains("A").await);
    }

    #[tokio::test]
    async fn test_execute_counts_creation_failure_as_first_attempt() {
        // Arrange
        let (pool, factory) = pool();
        factory.fail_creates.store(1, Ordering::SeqCst);

        // Act
        let result = pool.execute("A", |conn| async move { Ok(conn.serial) }).await;

        // Assert
        assert_eq!(result.unwrap(), 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_double_creation_failure_is_create_error() {
        let (pool, factory) = pool();
        factory.fail_creates.store(2, Ordering::SeqCst);

        let err = pool
            .execute("A", |_conn| async move { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Create { .. }));
        assert_eq!(err.key(), "A");
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (pool, _) = pool();
        pool.get_or_create("A").await.unwrap();
        pool.get_or_create("B").await.unwrap();

        pool.destroy("A").await;

        assert!(!pool.contains("A").await);
        assert!(pool.contains("B").await);
        assert_eq!(pool.len().await, 1);
    }
}
