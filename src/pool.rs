//! Bounded connection pool keyed by server id
//!
//! The pool hands out exclusive leases: `get` marks the entry as in use and
//! `release` returns it. A second `get` for a server whose connection is
//! leased does not wait, it fails fast with
//! [`TransportError::PoolExhausted`] so callers can apply their own
//! backpressure. Idle connections are reused across leases and evicted by a
//! background sweeper once they have been idle past the configured timeout.
//!
//! The pool is an explicit object, constructed with the factory it should
//! use and passed to whoever needs it. There is no process-wide instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::factory::CreateTransport;
use crate::transport::Transport;

/// Default maximum number of pooled connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;
/// Default idle lifetime in seconds before a connection is evicted
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
/// Default interval in seconds between idle sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Sizing and eviction options for the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections held at once
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds a released connection may sit idle before eviction
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds between sweeps of the idle set
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

struct PoolEntry {
    transport: Arc<dyn Transport>,
    in_use: bool,
    last_released: Instant,
    server_name: String,
}

type EntryMap = Arc<Mutex<HashMap<String, PoolEntry>>>;

/// Connection pool with exclusive leases and idle eviction
pub struct ConnectionPool {
    factory: Arc<dyn CreateTransport>,
    config: PoolConfig,
    entries: EntryMap,
    sweeper: JoinHandle<()>,
}

impl ConnectionPool {
    /// Build a pool around `factory` and start its idle sweeper
    pub fn new(factory: Arc<dyn CreateTransport>, config: PoolConfig) -> Self {
        let entries: EntryMap = Arc::new(Mutex::new(HashMap::new()));

        let sweeper = {
            let entries = Arc::clone(&entries);
            let idle_timeout = config.idle_timeout();
            let sweep_interval = config.sweep_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                ticker.tick().await; // the first tick fires immediately
                loop {
                    ticker.tick().await;
                    sweep_idle(&entries, idle_timeout).await;
                }
            })
        };

        Self {
            factory,
            config,
            entries,
            sweeper,
        }
    }

    /// Lease the connection for `server`, creating and connecting it if
    /// needed
    ///
    /// An idle entry is reused (and reconnected if its stream has dropped in
    /// the meantime). A leased entry, or a full pool with nothing idle to
    /// evict, fails fast with [`TransportError::PoolExhausted`].
    pub async fn get(
        &self,
        server: &ServerConfig,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let mut evicted: Option<(String, Arc<dyn Transport>)> = None;
        let transport = {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&server.id) {
                if entry.in_use {
                    return Err(TransportError::pool_exhausted(format!(
                        "connection for server {} is already leased",
                        server.id
                    )));
                }
                entry.in_use = true;
                debug!(server_id = %server.id, "reusing pooled connection");
                Arc::clone(&entry.transport)
            } else {
                if entries.len() >= self.config.max_connections {
                    // Make room by dropping the longest-idle entry, if any
                    let victim = entries
                        .iter()
                        .filter(|(_, entry)| !entry.in_use)
                        .min_by_key(|(_, entry)| entry.last_released)
                        .map(|(id, _)| id.clone());
                    match victim {
                        Some(id) => {
                            if let Some(entry) = entries.remove(&id) {
                                debug!(server_id = %id, "evicting idle connection to make room");
                                evicted = Some((id, entry.transport));
                            }
                        }
                        None => {
                            return Err(TransportError::pool_exhausted(format!(
                                "all {} connections are leased",
                                self.config.max_connections
                            )));
                        }
                    }
                }

                let transport = self.factory.create(&server.transport)?;
                // Reserve the slot before connecting so a concurrent get for
                // the same server fails fast instead of racing a second
                // transport into existence
                entries.insert(
                    server.id.clone(),
                    PoolEntry {
                        transport: Arc::clone(&transport),
                        in_use: true,
                        last_released: Instant::now(),
                        server_name: server.name.clone(),
                    },
                );
                info!(server_id = %server.id, name = %server.name, "created pooled connection");
                transport
            }
        };

        if let Some((old_id, old)) = evicted {
            if let Err(err) = old.disconnect().await {
                debug!(server_id = %old_id, error = %err, "disconnect failed during eviction");
            }
        }

        // Connect (or reconnect a dropped idle stream) outside the map lock
        if !transport.is_connected() {
            if let Err(err) = transport.connect().await {
                warn!(server_id = %server.id, error = %err, "pooled connection failed to connect");
                self.entries.lock().await.remove(&server.id);
                return Err(err);
            }
        }
        Ok(transport)
    }

    /// Return a leased connection to the idle set
    ///
    /// Releasing an unknown id is a no-op so callers can release
    /// unconditionally on their cleanup paths.
    pub async fn release(&self, server_id: &str) {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(server_id) {
            Some(entry) => {
                entry.in_use = false;
                entry.last_released = Instant::now();
                debug!(server_id, "released pooled connection");
            }
            None => debug!(server_id, "release for unknown server, ignoring"),
        }
    }

    /// Disconnect and drop the entry for `server_id`, leased or not
    pub async fn remove(&self, server_id: &str) -> Result<(), TransportError> {
        let entry = self.entries.lock().await.remove(server_id);
        if let Some(entry) = entry {
            info!(server_id, name = %entry.server_name, "removing pooled connection");
            entry.transport.disconnect().await?;
        }
        Ok(())
    }

    /// Stop the sweeper and disconnect every pooled connection
    pub async fn shutdown(&self) {
        self.sweeper.abort();
        let entries: Vec<PoolEntry> = self.entries.lock().await.drain().map(|(_, e)| e).collect();
        info!(count = entries.len(), "shutting down connection pool");
        for entry in entries {
            if let Err(err) = entry.transport.disconnect().await {
                warn!(name = %entry.server_name, error = %err, "disconnect failed during shutdown");
            }
        }
    }

    /// Number of pooled connections, leased or idle
    pub async fn connection_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Number of pooled connections currently idle
    pub async fn idle_count(&self) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| !entry.in_use)
            .count()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

async fn sweep_idle(entries: &Mutex<HashMap<String, PoolEntry>>, idle_timeout: Duration) {
    let expired: Vec<(String, PoolEntry)> = {
        let mut map = entries.lock().await;
        let now = Instant::now();
        let ids: Vec<String> = map
            .iter()
            .filter(|(_, entry)| {
                !entry.in_use && now.duration_since(entry.last_released) >= idle_timeout
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| map.remove(&id).map(|entry| (id, entry)))
            .collect()
    };

    for (id, entry) in expired {
        info!(server_id = %id, "evicting idle connection");
        if let Err(err) = entry.transport.disconnect().await {
            debug!(server_id = %id, error = %err, "disconnect failed during eviction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, StdioEndpoint, TransportConfig, TransportKind};
    use crate::transport::{StatusCell, TransportEvent, TransportStatus};
    use crate::types::{JsonRpcRequest, JsonRpcResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast;

    struct MockTransport {
        status: StatusCell,
        connects: AtomicU32,
        disconnects: AtomicU32,
        fail_connect: bool,
        fail_disconnect: bool,
    }

    impl MockTransport {
        fn new(fail_connect: bool, fail_disconnect: bool) -> Self {
            Self {
                status: StatusCell::new(),
                connects: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
                fail_connect,
                fail_disconnect,
            }
        }
    }

    impl std::fmt::Debug for MockTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockTransport")
                .field("status", &self.status.get())
                .finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(TransportError::connection("mock connect failure"));
            }
            self.status.set(TransportStatus::Connected);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.status.set(TransportStatus::Disconnected);
            if self.fail_disconnect {
                return Err(TransportError::connection("mock disconnect failure"));
            }
            Ok(())
        }

        async fn send_request(
            &self,
            request: JsonRpcRequest,
        ) -> Result<JsonRpcResponse, TransportError> {
            Ok(JsonRpcResponse::success(request.id, json!("mock")))
        }

        fn status(&self) -> TransportStatus {
            self.status.get()
        }

        fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
            self.status.subscribe()
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Stdio
        }

        fn next_request_id(&self) -> i64 {
            1
        }
    }

    struct MockFactory {
        created: std::sync::Mutex<Vec<Arc<MockTransport>>>,
        fail_connect: bool,
        fail_disconnect: bool,
    }

    impl MockFactory {
        fn new() -> Self {
            Self {
                created: std::sync::Mutex::new(Vec::new()),
                fail_connect: false,
                fail_disconnect: false,
            }
        }

        fn failing() -> Self {
            Self {
                created: std::sync::Mutex::new(Vec::new()),
                fail_connect: true,
                fail_disconnect: false,
            }
        }

        fn failing_disconnect() -> Self {
            Self {
                created: std::sync::Mutex::new(Vec::new()),
                fail_connect: false,
                fail_disconnect: true,
            }
        }

        fn create_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }

        fn created_at(&self, index: usize) -> Arc<MockTransport> {
            Arc::clone(&self.created.lock().unwrap()[index])
        }
    }

    impl CreateTransport for MockFactory {
        fn create(
            &self,
            _config: &TransportConfig,
        ) -> Result<Arc<dyn Transport>, TransportError> {
            let transport = Arc::new(MockTransport::new(self.fail_connect, self.fail_disconnect));
            self.created
                .lock()
                .unwrap()
                .push(Arc::clone(&transport));
            Ok(transport)
        }
    }

    fn server(id: &str) -> ServerConfig {
        ServerConfig {
            id: id.to_string(),
            name: format!("server {}", id),
            transport: TransportConfig::new(Endpoint::Stdio(StdioEndpoint {
                command: "mcp-server".to_string(),
                ..Default::default()
            })),
        }
    }

    fn small_pool_config(max: usize) -> PoolConfig {
        PoolConfig {
            max_connections: max,
            idle_timeout_secs: 300,
            sweep_interval_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_release_then_get_reuses_the_connection() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(Arc::clone(&factory) as _, PoolConfig::default());

        let first = pool.get(&server("a")).await.unwrap();
        pool.release("a").await;
        let second = pool.get(&server("a")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.create_count(), 1);
        assert_eq!(pool.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_leased_connection_is_exclusive() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(factory as _, PoolConfig::default());

        let _leased = pool.get(&server("a")).await.unwrap();
        let err = pool.get(&server("a")).await.unwrap_err();
        assert!(matches!(err, TransportError::PoolExhausted { .. }));

        pool.release("a").await;
        pool.get(&server("a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_pool_with_all_leases_rejects_fast() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(factory as _, small_pool_config(1));

        let _leased = pool.get(&server("a")).await.unwrap();
        let err = pool.get(&server("b")).await.unwrap_err();
        assert!(matches!(err, TransportError::PoolExhausted { .. }));
        assert!(err.to_string().contains("all 1 connections"));
    }

    #[tokio::test]
    async fn test_full_pool_evicts_longest_idle_entry() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(Arc::clone(&factory) as _, small_pool_config(1));

        pool.get(&server("a")).await.unwrap();
        pool.release("a").await;

        pool.get(&server("b")).await.unwrap();
        assert_eq!(pool.connection_count().await, 1);

        let evicted = factory.created_at(0);
        assert_eq!(evicted.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eviction_survives_a_failing_disconnect() {
        let factory = Arc::new(MockFactory::failing_disconnect());
        let pool = ConnectionPool::new(Arc::clone(&factory) as _, small_pool_config(1));

        pool.get(&server("a")).await.unwrap();
        pool.release("a").await;

        // The victim's disconnect error is logged, not propagated
        pool.get(&server("b")).await.unwrap();
        assert_eq!(pool.connection_count().await, 1);
        assert_eq!(factory.created_at(0).disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_idle_connection_is_reconnected() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(Arc::clone(&factory) as _, PoolConfig::default());

        pool.get(&server("a")).await.unwrap();
        pool.release("a").await;

        // the stream drops while the entry sits idle
        let transport = factory.created_at(0);
        transport.status.set(TransportStatus::Disconnected);

        let reused = pool.get(&server("a")).await.unwrap();
        assert!(reused.is_connected());
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        assert_eq!(factory.create_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_entry_behind() {
        let factory = Arc::new(MockFactory::failing());
        let pool = ConnectionPool::new(Arc::clone(&factory) as _, PoolConfig::default());

        let err = pool.get(&server("a")).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(pool.connection_count().await, 0);

        // the slot is free again; the next get tries from scratch
        let err = pool.get(&server("a")).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(factory.create_count(), 2);
    }

    #[tokio::test]
    async fn test_release_unknown_id_is_a_no_op() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(factory as _, PoolConfig::default());
        pool.release("never-seen").await;
        assert_eq!(pool.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_disconnects_and_drops_the_entry() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(Arc::clone(&factory) as _, PoolConfig::default());

        let removed = pool.get(&server("a")).await.unwrap();
        pool.remove("a").await.unwrap();

        assert_eq!(pool.connection_count().await, 0);
        let transport = factory.created_at(0);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);

        // the next get builds a fresh transport
        let fresh = pool.get(&server("a")).await.unwrap();
        assert!(!Arc::ptr_eq(&removed, &fresh));
        assert_eq!(factory.create_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_entries_idle_past_the_timeout() {
        let factory = Arc::new(MockFactory::new());
        let config = PoolConfig {
            max_connections: 4,
            idle_timeout_secs: 300,
            sweep_interval_secs: 60,
        };
        let pool = ConnectionPool::new(Arc::clone(&factory) as _, config);

        pool.get(&server("idle")).await.unwrap();
        pool.release("idle").await;
        let _held = pool.get(&server("busy")).await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;

        // The sweep tick can land on the same instant we wake up, so keep
        // stepping time until the eviction is observable
        let evicted = factory.created_at(0);
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(60)).await;
            if evicted.disconnects.load(Ordering::SeqCst) == 1 {
                break;
            }
        }

        assert_eq!(evicted.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.connection_count().await, 1);
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_spares_entries_within_the_timeout() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(factory as _, PoolConfig::default());

        pool.get(&server("a")).await.unwrap();
        pool.release("a").await;

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(pool.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_everything() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(Arc::clone(&factory) as _, PoolConfig::default());

        pool.get(&server("a")).await.unwrap();
        pool.get(&server("b")).await.unwrap();
        pool.shutdown().await;

        assert_eq!(pool.connection_count().await, 0);
        for index in 0..2 {
            let transport = factory.created_at(index);
            assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        }
    }
}
