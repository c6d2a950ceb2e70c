//! The four-port TCP listener surface (spec.md §4.7): a thin accept loop per
//! port, each one either handing the socket to the [`ConnectionManager`] or,
//! for the two ports this server does not yet speak a protocol on, closing
//! it immediately.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::manager::ConnectionManager;

/// Binds `host:port`. Callers pass port 0 in tests to get an OS-assigned
/// ephemeral port, read back from the returned listener's local address.
async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind((host, port)).await
}

/// MySQL protocol port: every accepted socket goes through the same
/// admission and session machinery as the management port. Returns the
/// bound address (which may differ from `port` when `port == 0`) alongside
/// the accept loop's join handle.
pub async fn spawn_mysql_listener(
    host: &str,
    port: u16,
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = bind(host, port).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "MySQL protocol server listening");
    let handle = tokio::spawn(accept_loop(listener, cancel, move |socket, peer| {
        let manager = Arc::clone(&manager);
        async move { manager.admit(socket, peer).await }
    }));
    Ok((addr, handle))
}

/// Management port: same MySQL wire protocol as the primary port, reserved
/// for administrative clients. spec.md draws no behavioral distinction
/// between the two today.
pub async fn spawn_management_listener(
    host: &str,
    port: u16,
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = bind(host, port).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "management server listening");
    let handle = tokio::spawn(accept_loop(listener, cancel, move |socket, peer| {
        let manager = Arc::clone(&manager);
        async move { manager.admit(socket, peer).await }
    }));
    Ok((addr, handle))
}

/// Internal cluster-communication port. No protocol is implemented yet;
/// every accepted socket is logged and closed without reading from it.
pub async fn spawn_internal_listener(
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = bind(host, port).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "internal communication server listening");
    let handle = tokio::spawn(accept_loop(listener, cancel, |socket, peer| async move {
        tracing::debug!(%peer, "internal connection");
        drop(socket);
    }));
    Ok((addr, handle))
}

/// X Protocol port. Reserved for a future document-protocol implementation;
/// for now it only accepts and closes, matching the cluster port's stub.
pub async fn spawn_xprotocol_listener(
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = bind(host, port).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "X Protocol server listening");
    let handle = tokio::spawn(accept_loop(listener, cancel, |socket, peer| async move {
        tracing::debug!(%peer, "xprotocol connection");
        drop(socket);
    }));
    Ok((addr, handle))
}

/// Shared accept-loop shape: race `listener.accept()` against cancellation
/// so shutdown doesn't have to wait for the next incoming connection, and
/// hand each accepted socket to `handle` on its own task so one slow accept
/// never blocks the next.
async fn accept_loop<F, Fut>(listener: TcpListener, cancel: CancellationToken, handle: F)
where
    F: Fn(tokio::net::TcpStream, std::net::SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let handle = Arc::new(handle);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((socket, peer)) => {
                    let handle = Arc::clone(&handle);
                    tokio::spawn(async move { handle(socket, peer).await });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            },
        }
    }
}
