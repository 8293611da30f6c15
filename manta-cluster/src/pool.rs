//! The per-server connection pool.
//!
//! Acquisition order: the request's pinned connection, then the
//! most-recently-used idle connection already authenticated for the
//! request, then the most-recently-used one that could legally
//! authenticate, then a brand-new connection. The authentication round
//! trip always runs outside the pool lock.
//!
//! The pool lock guards exactly two structures: the idle list and the
//! pin map. Connections themselves are handed out behind their own async
//! mutex, so authentication-state changes never stall other callers' pool
//! operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use crate::channel::ChannelFactory;
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionState};
use crate::credential::{Credential, CredentialProvider};
use crate::error::{ClusterError, ClusterResult};
use crate::server::ServerEndpoint;

/// A pooled connection handle.
pub type SharedConnection = Arc<tokio::sync::Mutex<Connection>>;

/// A handle pinning one connection to a logical request.
///
/// While a scope is active, every [`ConnectionPool::acquire`] call passing
/// it returns the pinned connection; the connection rejoins the idle set
/// when the outermost scope ends.
#[derive(Debug)]
pub struct RequestScope {
    id: u64,
}

type UnreachableHandler = Arc<dyn Fn(&ServerEndpoint) + Send + Sync>;

struct PinnedEntry {
    connection: SharedConnection,
    nesting: u32,
}

struct PoolState {
    // ordered least-recently-used first; released connections push to the back
    idle: Vec<SharedConnection>,
    pinned: HashMap<u64, PinnedEntry>,
}

struct PoolInner {
    endpoint: ServerEndpoint,
    config: PoolConfig,
    factory: Arc<dyn ChannelFactory>,
    provider: Arc<dyn CredentialProvider>,
    state: Mutex<PoolState>,
    generation: AtomicU64,
    next_connection_id: AtomicU64,
    next_request_id: AtomicU64,
    closed: AtomicBool,
    unreachable_handler: Mutex<Option<UnreachableHandler>>,
}

/// A bounded pool of reusable connections to one server.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool for one server endpoint.
    pub fn new(
        endpoint: ServerEndpoint,
        config: PoolConfig,
        factory: Arc<dyn ChannelFactory>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                endpoint,
                config,
                factory,
                provider,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    pinned: HashMap::new(),
                }),
                generation: AtomicU64::new(0),
                next_connection_id: AtomicU64::new(0),
                next_request_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                unreachable_handler: Mutex::new(None),
            }),
        }
    }

    /// The server this pool connects to.
    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.inner.endpoint
    }

    /// The current pool generation; connections from older generations are
    /// discarded when released.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of pinned requests.
    pub fn pinned_count(&self) -> usize {
        self.inner.state.lock().pinned.len()
    }

    /// Install a callback fired when a socket-level failure suggests the
    /// whole server is unreachable. The cluster monitor wires this to a
    /// rapid heartbeat request.
    pub fn set_unreachable_handler(&self, handler: UnreachableHandler) {
        *self.inner.unreachable_handler.lock() = Some(handler);
    }

    /// Acquire a connection usable for the given database and credentials.
    ///
    /// Bounded by the configured acquire timeout; on timeout, a connection
    /// already pulled off the idle list is returned to the pool rather
    /// than leaked.
    pub async fn acquire(
        &self,
        database: &str,
        credential: Option<&Credential>,
        request: Option<&RequestScope>,
    ) -> ClusterResult<SharedConnection> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClusterError::PoolClosed);
        }
        let deadline = tokio::time::Instant::now() + self.inner.config.acquire_timeout;

        // a pinned connection short-circuits everything else
        if let Some(scope) = request {
            let pinned = self
                .inner
                .state
                .lock()
                .pinned
                .get(&scope.id)
                .map(|entry| entry.connection.clone());
            if let Some(connection) = pinned {
                self.ensure_ready(&connection, database, credential).await?;
                return Ok(connection);
            }
        }

        let candidate = self.take_idle(database, credential);
        let connection = match candidate {
            Some(connection) => connection,
            None => match timeout_at(deadline, self.open_connection()).await {
                Ok(opened) => opened?,
                Err(_) => {
                    return Err(ClusterError::AcquireTimeout(
                        self.inner.config.acquire_timeout,
                    ));
                }
            },
        };

        // the slow step, outside the pool lock and under the deadline
        match timeout_at(deadline, self.ensure_ready(&connection, database, credential)).await {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(err)) => {
                let broken = connection.lock().await.had_socket_error();
                if broken {
                    self.discard(connection).await;
                } else {
                    self.release(connection).await;
                }
                Err(err)
            }
            Err(_) => {
                // the authentication future was cancelled; the connection
                // goes back to the pool rather than leaking
                self.release(connection).await;
                Err(ClusterError::AcquireTimeout(
                    self.inner.config.acquire_timeout,
                ))
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// Broken, closed, and stale-generation connections are discarded;
    /// over-idle connections and, when the pool is full, the
    /// least-recently-used connection are closed off the critical path.
    pub async fn release(&self, connection: SharedConnection) {
        if self.inner.closed.load(Ordering::SeqCst) {
            connection.lock().await.close().await;
            return;
        }

        let (discard, broken) = {
            let mut conn = connection.lock().await;
            conn.reset_authenticating();
            let broken = conn.had_socket_error();
            let stale = conn.generation() != self.generation();
            let discard = broken || stale || conn.state() == ConnectionState::Closed;
            if !discard {
                conn.touch();
            }
            (discard, broken)
        };

        if discard {
            if broken {
                warn!(endpoint = %self.inner.endpoint, "discarding broken connection, clearing pool");
                self.clear();
                self.notify_unreachable();
            }
            self.discard(connection).await;
            return;
        }

        let mut to_close: Vec<SharedConnection> = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.idle.push(connection);

            // idle-time eviction
            let max_idle = self.inner.config.max_idle_time;
            state.idle.retain(|idle| match idle.try_lock() {
                Ok(guard) => {
                    if guard.last_used().elapsed() > max_idle {
                        to_close.push(idle.clone());
                        false
                    } else {
                        true
                    }
                }
                Err(_) => true,
            });

            // size bound: evict the least recently used
            while state.idle.len() > self.inner.config.max_pool_size {
                let mut oldest: Option<(usize, Instant)> = None;
                for (index, idle) in state.idle.iter().enumerate() {
                    if let Ok(guard) = idle.try_lock() {
                        let last_used = guard.last_used();
                        if oldest.is_none_or(|(_, t)| last_used < t) {
                            oldest = Some((index, last_used));
                        }
                    }
                }
                match oldest {
                    Some((index, _)) => {
                        let evicted = state.idle.remove(index);
                        to_close.push(evicted);
                    }
                    None => break,
                }
            }
        }

        if !to_close.is_empty() {
            debug!(
                endpoint = %self.inner.endpoint,
                evicted = to_close.len(),
                "evicting idle connections"
            );
            tokio::spawn(async move {
                for connection in to_close {
                    connection.lock().await.close().await;
                }
            });
        }
    }

    /// Begin a request scope: acquire a connection and pin it.
    pub async fn begin_request(
        &self,
        database: &str,
        credential: Option<&Credential>,
    ) -> ClusterResult<RequestScope> {
        let connection = self.acquire(database, credential, None).await?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        self.inner.state.lock().pinned.insert(
            id,
            PinnedEntry {
                connection,
                nesting: 1,
            },
        );
        debug!(endpoint = %self.inner.endpoint, request = id, "request scope pinned");
        Ok(RequestScope { id })
    }

    /// Re-enter an existing request scope, incrementing its nesting count.
    pub fn begin_nested_request(&self, scope: &RequestScope) -> ClusterResult<()> {
        let mut state = self.inner.state.lock();
        let entry = state
            .pinned
            .get_mut(&scope.id)
            .ok_or_else(|| ClusterError::invalid_state("request scope is not active"))?;
        entry.nesting += 1;
        Ok(())
    }

    /// Leave a request scope. The pinned connection returns to the idle
    /// set when the outermost scope ends.
    pub async fn end_request(&self, scope: RequestScope) -> ClusterResult<()> {
        let released = {
            let mut state = self.inner.state.lock();
            let entry = state
                .pinned
                .get_mut(&scope.id)
                .ok_or_else(|| ClusterError::invalid_state("request scope is not active"))?;
            entry.nesting -= 1;
            if entry.nesting == 0 {
                state
                    .pinned
                    .remove(&scope.id)
                    .map(|entry| entry.connection)
            } else {
                None
            }
        };
        if let Some(connection) = released {
            self.release(connection).await;
        }
        Ok(())
    }

    /// Discard every idle connection and bump the generation, so stale
    /// connections are dropped as they come back.
    pub fn clear(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let drained: Vec<SharedConnection> = {
            let mut state = self.inner.state.lock();
            state.idle.drain(..).collect()
        };
        info!(
            endpoint = %self.inner.endpoint,
            generation,
            drained = drained.len(),
            "connection pool cleared"
        );
        if !drained.is_empty() {
            tokio::spawn(async move {
                for connection in drained {
                    connection.lock().await.close().await;
                }
            });
        }
    }

    /// Close the pool and every connection it holds.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let all: Vec<SharedConnection> = {
            let mut state = self.inner.state.lock();
            let mut all: Vec<_> = state.idle.drain(..).collect();
            all.extend(state.pinned.drain().map(|(_, entry)| entry.connection));
            all
        };
        info!(endpoint = %self.inner.endpoint, closed = all.len(), "connection pool closed");
        futures::future::join_all(all.into_iter().map(|connection| async move {
            connection.lock().await.close().await;
        }))
        .await;
    }

    // MRU scan: first for a connection already authenticated for the
    // request, then for one that could legally authenticate.
    fn take_idle(
        &self,
        database: &str,
        credential: Option<&Credential>,
    ) -> Option<SharedConnection> {
        let mut state = self.inner.state.lock();
        for matcher in [true, false] {
            for index in (0..state.idle.len()).rev() {
                let Ok(guard) = state.idle[index].try_lock() else {
                    continue;
                };
                let usable = if matcher {
                    guard.is_authenticated_for(database, credential)
                } else {
                    guard.can_authenticate(database, credential)
                };
                drop(guard);
                if usable {
                    return Some(state.idle.remove(index));
                }
            }
        }
        None
    }

    async fn open_connection(&self) -> ClusterResult<SharedConnection> {
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let channel = self.inner.factory.connect(&self.inner.endpoint).await?;
        let mut connection = Connection::new(id, self.inner.endpoint.clone(), self.generation());
        connection.open(channel)?;
        debug!(endpoint = %self.inner.endpoint, connection = id, "new pooled connection");
        Ok(Arc::new(tokio::sync::Mutex::new(connection)))
    }

    async fn ensure_ready(
        &self,
        connection: &SharedConnection,
        database: &str,
        credential: Option<&Credential>,
    ) -> ClusterResult<()> {
        let mut conn = connection.lock().await;
        if conn.is_authenticated_for(database, credential) {
            return Ok(());
        }
        if !conn.can_authenticate(database, credential) {
            return Err(ClusterError::AuthenticationConflict(database.to_string()));
        }
        conn.ensure_authenticated(database, credential, self.inner.provider.as_ref())
            .await
    }

    async fn discard(&self, connection: SharedConnection) {
        connection.lock().await.close().await;
    }

    fn notify_unreachable(&self) {
        let handler = self.inner.unreachable_handler.lock().clone();
        if let Some(handler) = handler {
            handler(&self.inner.endpoint);
        }
    }

    #[cfg(test)]
    fn idle_ids(&self) -> Vec<u64> {
        self.inner
            .state
            .lock()
            .idle
            .iter()
            .filter_map(|conn| conn.try_lock().ok().map(|guard| guard.id()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HangingProvider, RecordingFactory, StaticProvider};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn pool_with(
        config: PoolConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> (ConnectionPool, Arc<RecordingFactory>) {
        let factory = Arc::new(RecordingFactory::default());
        let pool = ConnectionPool::new(
            ServerEndpoint::new("db1", 27017),
            config,
            factory.clone(),
            provider,
        );
        (pool, factory)
    }

    #[tokio::test]
    async fn test_acquire_reuses_released_connection() {
        let (pool, factory) = pool_with(PoolConfig::default(), Arc::new(StaticProvider::accepting()));

        let conn = pool.acquire("orders", None, None).await.unwrap();
        pool.release(conn).await;
        let again = pool.acquire("orders", None, None).await.unwrap();
        pool.release(again).await;

        assert_eq!(factory.opened(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_authentication_happens_once_per_connection() {
        let provider = Arc::new(StaticProvider::accepting());
        let (pool, _) = pool_with(PoolConfig::default(), provider.clone());
        let credential = Credential::new("app", "pw");

        let conn = pool.acquire("orders", Some(&credential), None).await.unwrap();
        pool.release(conn).await;
        let conn = pool.acquire("orders", Some(&credential), None).await.unwrap();
        pool.release(conn).await;

        assert_eq!(provider.exchanges(), 1);
    }

    #[tokio::test]
    async fn test_admin_authenticated_connection_not_reused_for_plain_request() {
        let provider = Arc::new(StaticProvider::accepting());
        let (pool, factory) = pool_with(PoolConfig::default(), provider);
        let admin = Credential::admin("root", "pw");
        let plain = Credential::new("app", "pw");

        let conn = pool.acquire("orders", Some(&admin), None).await.unwrap();
        pool.release(conn).await;

        // the admin-authenticated idle connection is unusable here
        let conn = pool.acquire("orders", Some(&plain), None).await.unwrap();
        pool.release(conn).await;

        assert_eq!(factory.opened(), 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_plain_authenticated_connection_not_reused_for_admin_request() {
        let provider = Arc::new(StaticProvider::accepting());
        let (pool, factory) = pool_with(PoolConfig::default(), provider);
        let plain = Credential::new("app", "pw");
        let admin = Credential::admin("root", "pw");

        let conn = pool.acquire("orders", Some(&plain), None).await.unwrap();
        pool.release(conn).await;
        let conn = pool.acquire("orders", Some(&admin), None).await.unwrap();
        pool.release(conn).await;

        assert_eq!(factory.opened(), 2);
    }

    #[tokio::test]
    async fn test_authenticated_connection_preferred_over_fresh_candidate() {
        let provider = Arc::new(StaticProvider::accepting());
        let (pool, _) = pool_with(PoolConfig::default(), provider.clone());
        let credential = Credential::new("app", "pw");

        // two idle connections: one authenticated for orders, one bare
        let authed = pool.acquire("orders", Some(&credential), None).await.unwrap();
        let bare = pool.acquire("orders", None, None).await.unwrap();
        let authed_id = authed.lock().await.id();
        pool.release(authed).await;
        pool.release(bare).await;

        // the bare one is more recently used, but the authenticated one
        // wins the first scan
        let picked = pool.acquire("orders", Some(&credential), None).await.unwrap();
        assert_eq!(picked.lock().await.id(), authed_id);
        assert_eq!(provider.exchanges(), 1);
        pool.release(picked).await;
    }

    #[tokio::test]
    async fn test_pool_bounded_size_evicts_least_recently_used() {
        let config = PoolConfig::new().max_pool_size(3);
        let (pool, _) = pool_with(config, Arc::new(StaticProvider::accepting()));

        let mut connections = Vec::new();
        for _ in 0..4 {
            connections.push(pool.acquire("orders", None, None).await.unwrap());
        }
        let first_id = connections[0].lock().await.id();
        for conn in connections {
            pool.release(conn).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(pool.idle_count(), 3);
        assert!(!pool.idle_ids().contains(&first_id));
    }

    #[tokio::test]
    async fn test_request_pinning_returns_same_connection() {
        let (pool, factory) = pool_with(PoolConfig::default(), Arc::new(StaticProvider::accepting()));

        let scope = pool.begin_request("orders", None).await.unwrap();
        let a = pool.acquire("orders", None, Some(&scope)).await.unwrap();
        let b = pool.acquire("orders", None, Some(&scope)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.opened(), 1);

        pool.begin_nested_request(&scope).unwrap();
        pool.end_request(RequestScope { id: scope.id }).await.unwrap();
        // still pinned: the outer scope is active
        assert_eq!(pool.pinned_count(), 1);

        pool.end_request(scope).await.unwrap();
        assert_eq!(pool.pinned_count(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_returns_connection_to_pool() {
        let config = PoolConfig::new().acquire_timeout(Duration::from_millis(20));
        let (pool, _) = pool_with(config, Arc::new(HangingProvider));
        let credential = Credential::new("app", "pw");

        let err = pool
            .acquire("orders", Some(&credential), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::AcquireTimeout(_)));
        // the half-acquired connection was returned, not leaked
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_generation_discarded_on_release() {
        let (pool, _) = pool_with(PoolConfig::default(), Arc::new(StaticProvider::accepting()));

        let conn = pool.acquire("orders", None, None).await.unwrap();
        pool.clear();
        pool.release(conn).await;
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let (pool, _) = pool_with(PoolConfig::default(), Arc::new(StaticProvider::accepting()));
        pool.close().await;
        let err = pool.acquire("orders", None, None).await.unwrap_err();
        assert!(matches!(err, ClusterError::PoolClosed));
    }

    #[tokio::test]
    async fn test_broken_connection_clears_pool_and_notifies() {
        let (pool, _) = pool_with(PoolConfig::default(), Arc::new(StaticProvider::accepting()));
        let notified = Arc::new(AtomicBool::new(false));
        {
            let notified = notified.clone();
            pool.set_unreachable_handler(Arc::new(move |_| {
                notified.store(true, Ordering::SeqCst);
            }));
        }

        // one connection in use, one left idle
        let conn = pool.acquire("orders", None, None).await.unwrap();
        let spare = pool.acquire("orders", None, None).await.unwrap();
        pool.release(spare).await;
        assert_eq!(pool.idle_count(), 1);

        conn.lock().await.record_socket_error().await;
        pool.release(conn).await;

        assert!(notified.load(Ordering::SeqCst));
        // the generation bump drained the idle spare too
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_timeout_eviction() {
        let config = PoolConfig::new().max_idle_time(Duration::from_millis(10));
        let (pool, _) = pool_with(config, Arc::new(StaticProvider::accepting()));

        // hold one connection while the other goes idle and expires
        let old = pool.acquire("orders", None, None).await.unwrap();
        let held = pool.acquire("orders", None, None).await.unwrap();
        let held_id = held.lock().await.id();
        pool.release(old).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        pool.release(held).await;

        // the over-idle connection was dropped when the held one came back
        assert_eq!(pool.idle_ids(), vec![held_id]);
    }
}
