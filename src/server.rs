//! `HchDbServer`: owns the four listener tasks and their shared shutdown
//! token (spec.md §4.7). Grounded on the lifecycle of the system this
//! crate's protocol core is modeled on, which starts all four ports up
//! front and tears them down together on `stop`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::listener;
use crate::manager::ConnectionManager;

/// Bound addresses for the four ports, read back after `start()` in case
/// the config asked for an OS-assigned ephemeral port (`0`).
#[derive(Debug, Clone, Copy)]
pub struct BoundAddresses {
    pub mysql: SocketAddr,
    pub management: SocketAddr,
    pub internal: SocketAddr,
    pub xprotocol: SocketAddr,
}

pub struct HchDbServer {
    manager: Arc<ConnectionManager>,
    config: Arc<AppConfig>,
    cancel: CancellationToken,
    listeners: Vec<JoinHandle<()>>,
    addresses: Option<BoundAddresses>,
}

impl HchDbServer {
    pub fn new(config: Arc<AppConfig>, manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            config,
            cancel: CancellationToken::new(),
            listeners: Vec::new(),
            addresses: None,
        }
    }

    /// The addresses actually bound by [`Self::start`], or `None` before it
    /// has run.
    pub fn addresses(&self) -> Option<BoundAddresses> {
        self.addresses
    }

    /// Starts all four listeners and the connection manager's idle reaper.
    /// Fails fast if any port cannot be bound; listeners already started are
    /// left running for [`Self::stop`] to tear down.
    pub async fn start(&mut self) -> std::io::Result<()> {
        let host = self.config.server.host.clone();
        let ports = self.config.server.ports.clone();

        self.manager.start_reaper().await;

        let (mysql_addr, mysql) = listener::spawn_mysql_listener(
            &host,
            ports.mysql,
            Arc::clone(&self.manager),
            self.cancel.child_token(),
        )
        .await?;
        self.listeners.push(mysql);

        let (management_addr, management) = listener::spawn_management_listener(
            &host,
            ports.management,
            Arc::clone(&self.manager),
            self.cancel.child_token(),
        )
        .await?;
        self.listeners.push(management);

        let (internal_addr, internal) =
            listener::spawn_internal_listener(&host, ports.internal, self.cancel.child_token()).await?;
        self.listeners.push(internal);

        let (xprotocol_addr, xprotocol) =
            listener::spawn_xprotocol_listener(&host, ports.xprotocol, self.cancel.child_token()).await?;
        self.listeners.push(xprotocol);

        self.addresses = Some(BoundAddresses {
            mysql: mysql_addr,
            management: management_addr,
            internal: internal_addr,
            xprotocol: xprotocol_addr,
        });

        tracing::info!("all HchDB servers started successfully");
        Ok(())
    }

    /// Cancels every listener and the connection manager, then waits for
    /// all listener tasks to finish. Session teardown is the manager's
    /// responsibility, not the listeners'.
    pub async fn stop(&mut self) {
        tracing::info!("stopping HchDB servers");
        self.cancel.cancel();
        self.addresses = None;

        for handle in self.listeners.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "listener task ended with an error during shutdown");
            }
        }

        self.manager.shutdown().await;
        tracing::info!("all HchDB servers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthRegistry;
    use crate::responder::FallbackResponder;
    use std::collections::HashMap;

    fn test_config() -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        // Bind ephemeral ports so the test suite never collides with a real
        // HchDB instance or with other tests in the same process.
        config.server.ports.mysql = 0;
        config.server.ports.management = 0;
        config.server.ports.internal = 0;
        config.server.ports.xprotocol = 0;
        config.server.host = "127.0.0.1".to_string();
        Arc::new(config)
    }

    #[tokio::test]
    async fn starts_and_stops_all_four_listeners() {
        let config = test_config();
        let manager = ConnectionManager::new(
            Arc::clone(&config),
            AuthRegistry::new(HashMap::new()),
            Arc::new(FallbackResponder {
                server_version: config.server.server_version.clone(),
                max_connections: config.connection.pool.max_connections,
            }),
        );

        let mut server = HchDbServer::new(config, Arc::clone(&manager));
        server.start().await.unwrap();
        assert_eq!(server.listeners.len(), 4);
        let addresses = server.addresses().expect("addresses set after start");
        assert_ne!(addresses.mysql.port(), 0);
        assert_ne!(addresses.management.port(), 0);

        server.stop().await;
        assert!(server.listeners.is_empty());
        assert!(server.addresses().is_none());
    }
}
