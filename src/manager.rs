//! Connection manager (spec.md §4.6): the process-wide registry of live
//! connections, the admission authority, the idle reaper, and graceful
//! shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthRegistry;
use crate::config::AppConfig;
use crate::responder::QueryHandler;
use crate::session::Session;

/// Per-connection record, created on accept and destroyed when the owning
/// session terminates. `username`/`database` stay empty until
/// authentication completes.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: u32,
    pub peer: SocketAddr,
    pub username: String,
    pub database: String,
    pub connected_at: tokio::time::Instant,
    pub last_activity: tokio::time::Instant,
    pub query_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl ConnectionInfo {
    fn new(id: u32, peer: SocketAddr) -> Self {
        let now = tokio::time::Instant::now();
        Self {
            id,
            peer,
            username: String::new(),
            database: String::new(),
            connected_at: now,
            last_activity: now,
            query_count: 0,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

struct SessionHandle {
    join: JoinHandle<()>,
    cancel: CancellationToken,
}

struct ManagerState {
    next_id: u32,
    connections: HashMap<u32, ConnectionInfo>,
    sessions: HashMap<u32, SessionHandle>,
    total: u64,
    rejected: u64,
}

/// Snapshot of the statistics spec.md §4.6 asks the manager to expose.
#[derive(Debug, Clone, Copy)]
pub struct Statistics {
    pub current_connections: u32,
    pub max_connections: u32,
    pub total_connections: u64,
    pub rejected_connections: u64,
    pub uptime_seconds: f64,
    pub connection_rate: f64,
    pub rejection_rate: f64,
}

pub struct ConnectionManager {
    state: Mutex<ManagerState>,
    config: Arc<AppConfig>,
    auth: Arc<AuthRegistry>,
    query_handler: Arc<dyn QueryHandler>,
    max: u32,
    idle_timeout: Duration,
    start_time: tokio::time::Instant,
    shutdown: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: Arc<AppConfig>, auth: AuthRegistry, query_handler: Arc<dyn QueryHandler>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManagerState {
                next_id: 1,
                connections: HashMap::new(),
                sessions: HashMap::new(),
                total: 0,
                rejected: 0,
            }),
            max: config.connection.pool.max_connections,
            idle_timeout: Duration::from_secs(config.connection.pool.idle_timeout),
            config,
            auth: Arc::new(auth),
            query_handler,
            start_time: tokio::time::Instant::now(),
            shutdown: CancellationToken::new(),
            reaper: Mutex::new(None),
        })
    }

    /// Starts the 60-second idle-reap background task. Idempotent: calling
    /// it twice replaces the previous handle without leaking the old task
    /// (it is aborted).
    pub async fn start_reaper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = ticker.tick() => manager.reap_idle_connections().await,
                }
            }
        });

        let mut reaper = self.reaper.lock().await;
        if let Some(old) = reaper.replace(handle) {
            old.abort();
        }
    }

    async fn reap_idle_connections(&self) {
        let now = tokio::time::Instant::now();
        let idle = {
            let state = self.state.lock().await;
            state
                .connections
                .values()
                .filter(|info| now.duration_since(info.last_activity) > self.idle_timeout)
                .map(|info| info.id)
                .collect::<Vec<_>>()
        };

        if idle.is_empty() {
            return;
        }

        tracing::info!(count = idle.len(), "reaping idle connections");
        for id in idle {
            crate::metrics::record_idle_timeout();
            self.close_connection(id).await;
        }
    }

    async fn close_connection(&self, id: u32) {
        let handle = {
            let mut state = self.state.lock().await;
            state.connections.remove(&id);
            state.sessions.remove(&id)
        };
        if let Some(handle) = handle {
            handle.cancel.cancel();
            crate::metrics::record_connection_closed();
        }
    }

    /// Admits an accepted socket: enforces the concurrency cap, allocates a
    /// connection id, and spawns the owning session task. Rejected sockets
    /// are closed immediately with no protocol traffic.
    pub async fn admit(self: &Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        let id = {
            let mut state = self.state.lock().await;
            if state.connections.len() as u32 >= self.max {
                state.rejected += 1;
                tracing::warn!(%peer, rejected = state.rejected, "connection limit reached, rejecting");
                drop(state);
                drop(socket);
                crate::metrics::record_connection_rejected();
                return;
            }

            let id = state.next_id;
            state.next_id += 1;
            state.connections.insert(id, ConnectionInfo::new(id, peer));
            state.total += 1;
            id
        };

        crate::metrics::record_connection_opened();
        tracing::info!(connection_id = id, %peer, "new connection");

        let cancel = self.shutdown.child_token();
        let session = Session::new(
            socket,
            id,
            peer,
            Arc::clone(&self.config),
            Arc::clone(&self.auth),
            Arc::clone(&self.query_handler),
            Arc::clone(self),
            cancel.clone(),
        );

        let manager = Arc::clone(self);
        let join = tokio::spawn(async move {
            session.run().await;
            manager.close_connection(id).await;
        });

        let mut state = self.state.lock().await;
        state.sessions.insert(id, SessionHandle { join, cancel });
    }

    pub async fn update_auth(&self, id: u32, username: &str, database: &str) {
        let mut state = self.state.lock().await;
        if let Some(info) = state.connections.get_mut(&id) {
            info.username = username.to_string();
            info.database = database.to_string();
        }
    }

    pub async fn set_database(&self, id: u32, database: &str) {
        let mut state = self.state.lock().await;
        if let Some(info) = state.connections.get_mut(&id) {
            info.database = database.to_string();
        }
    }

    pub async fn record_activity(&self, id: u32, bytes_sent: u64, bytes_received: u64, queries: u64) {
        let mut state = self.state.lock().await;
        if let Some(info) = state.connections.get_mut(&id) {
            info.last_activity = tokio::time::Instant::now();
            info.bytes_sent += bytes_sent;
            info.bytes_received += bytes_received;
            info.query_count += queries;
        }
        drop(state);
        for _ in 0..queries {
            crate::metrics::record_query_processed();
        }
    }

    pub async fn connection_count(&self) -> u32 {
        self.state.lock().await.connections.len() as u32
    }

    pub async fn statistics(&self) -> Statistics {
        let state = self.state.lock().await;
        let uptime_seconds = self.start_time.elapsed().as_secs_f64();
        Statistics {
            current_connections: state.connections.len() as u32,
            max_connections: self.max,
            total_connections: state.total,
            rejected_connections: state.rejected,
            uptime_seconds,
            connection_rate: if uptime_seconds > 0.0 {
                state.total as f64 / uptime_seconds
            } else {
                0.0
            },
            rejection_rate: if uptime_seconds > 0.0 {
                state.rejected as f64 / uptime_seconds
            } else {
                0.0
            },
        }
    }

    /// Cancels the reaper and every live session, then waits for all of
    /// them to finish. Individual session task failures are logged, not
    /// propagated.
    pub async fn shutdown(&self) {
        tracing::info!("connection manager shutting down");
        self.shutdown.cancel();

        if let Some(reaper) = self.reaper.lock().await.take() {
            let _ = reaper.await;
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock().await;
            state.sessions.drain().map(|(_, h)| h.join).collect()
        };

        let results = futures::future::join_all(handles).await;
        for result in results {
            if let Err(e) = result {
                tracing::warn!(error = %e, "session task ended with an error during shutdown");
            }
        }

        tracing::info!("connection manager stopped");
    }
}
