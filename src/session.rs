//! The per-connection protocol state machine (spec.md §4.4): drives one
//! client through `GREETING -> AUTH_WAIT -> READY/IN_COMMAND -> CLOSING`,
//! owning the socket, the outgoing sequence counter, and the current
//! database/username for that connection.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::AuthRegistry;
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::manager::ConnectionManager;
use crate::protocol::builder::PacketBuilder;
use crate::protocol::packet::{try_read_packet, RawPacket, CAP_PROTOCOL_41};
use crate::protocol::parser::{parse_command, parse_handshake_response, Command};
use crate::responder::{QueryHandler, QueryOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Greeting,
    AuthWait,
    Ready,
    Closing,
}

pub struct Session {
    stream: TcpStream,
    read_buf: BytesMut,
    builder: PacketBuilder,
    connection_id: u32,
    peer: SocketAddr,
    config: Arc<AppConfig>,
    auth: Arc<AuthRegistry>,
    query_handler: Arc<dyn QueryHandler>,
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
    username: String,
    database: String,
    state: SessionState,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: TcpStream,
        connection_id: u32,
        peer: SocketAddr,
        config: Arc<AppConfig>,
        auth: Arc<AuthRegistry>,
        query_handler: Arc<dyn QueryHandler>,
        manager: Arc<ConnectionManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            builder: PacketBuilder::new(),
            connection_id,
            peer,
            config,
            auth,
            query_handler,
            manager,
            cancel,
            username: String::new(),
            database: String::new(),
            state: SessionState::Greeting,
        }
    }

    pub async fn run(self) {
        let span = tracing::info_span!("session", connection_id = self.connection_id, peer = %self.peer);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) {
        if let Err(e) = self.greet().await {
            tracing::warn!(error = %e, "failed to send handshake");
            return;
        }

        loop {
            match self.state {
                SessionState::AuthWait => {
                    if let Err(terminal) = self.authenticate().await {
                        if terminal {
                            self.state = SessionState::Closing;
                        }
                    }
                }
                SessionState::Ready => match self.next_command_round_trip().await {
                    Ok(true) => {}
                    Ok(false) => self.state = SessionState::Closing,
                    Err(_) => self.state = SessionState::Closing,
                },
                SessionState::Closing | SessionState::Greeting => break,
            }

            if self.state == SessionState::Closing {
                break;
            }
            if self.cancel.is_cancelled() {
                self.state = SessionState::Closing;
                break;
            }
        }

        self.close().await;
    }

    async fn greet(&mut self) -> Result<(), SessionError> {
        self.builder.reset_sequence();
        let seed = auth_seed(self.connection_id);
        let packet = self
            .builder
            .build_handshake(self.connection_id, &self.config.server.server_version, &seed)
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        self.send(packet).await?;
        self.state = SessionState::AuthWait;
        Ok(())
    }

    /// Returns `Err(true)` when the failure should close the connection
    /// (auth failure, parse error, or EOF); the caller always transitions
    /// to `CLOSING` on any `Err`, so the bool is informational only for
    /// call sites that want to special-case it.
    async fn authenticate(&mut self) -> Result<(), bool> {
        let packet = match self.read_packet().await {
            Ok(Some(p)) => p,
            Ok(None) => return Err(true),
            Err(_) => return Err(true),
        };

        self.builder.sync_sequence(packet.sequence_id);

        let mut payload = packet.payload.clone();
        let response = match parse_handshake_response(&mut payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse handshake response");
                let _ = self.send_error(1105, b"HY000", "Malformed handshake response").await;
                return Err(true);
            }
        };

        self.builder.set_capability_flags(response.capability_flags);
        self.username = response.username.clone();
        self.database = response.database.clone().unwrap_or_default();

        if !self.auth.check(&response.username, &response.auth_response) {
            tracing::warn!(username = %response.username, "authentication failed");
            let _ = self.send_error(1045, b"HY000", &format!("Access denied for user '{}'", response.username)).await;
            return Err(true);
        }

        self.manager
            .update_auth(self.connection_id, &self.username, &self.database)
            .await;

        let ok = match self.builder.build_ok(0, 0, "") {
            Ok(p) => p,
            Err(_) => return Err(true),
        };
        if self.send(ok).await.is_err() {
            return Err(true);
        }

        tracing::info!(username = %self.username, "authenticated");
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Reads and fully answers one client command. Returns `Ok(false)` on a
    /// clean client disconnect (QUIT or EOF), `Ok(true)` to stay in READY.
    async fn next_command_round_trip(&mut self) -> Result<bool, SessionError> {
        let packet = match self.read_packet().await? {
            Some(p) => p,
            None => return Ok(false),
        };

        self.builder.reset_sequence();
        self.builder.sync_sequence(packet.sequence_id);

        let payload: Bytes = packet.payload.freeze();
        let Some(command) = parse_command(payload) else {
            self.send_error(1064, b"42000", "Empty command packet").await?;
            return Ok(true);
        };

        self.manager.record_activity(self.connection_id, 0, 0, 1).await;

        match command {
            Command::Quit => {
                tracing::debug!("client sent QUIT");
                Ok(false)
            }
            Command::Ping => {
                let ok = self
                    .builder
                    .build_ok(0, 0, "")
                    .map_err(|e| SessionError::protocol(e.to_string()))?;
                self.send(ok).await?;
                Ok(true)
            }
            Command::InitDb(database) => {
                self.database = database.clone();
                self.manager.set_database(self.connection_id, &database).await;
                let ok = self
                    .builder
                    .build_ok(0, 0, "")
                    .map_err(|e| SessionError::protocol(e.to_string()))?;
                self.send(ok).await?;
                Ok(true)
            }
            Command::FieldList(_) => {
                let eof = self
                    .builder
                    .build_eof()
                    .map_err(|e| SessionError::protocol(e.to_string()))?;
                self.send(eof).await?;
                Ok(true)
            }
            Command::Query(query) => {
                self.handle_query(&query).await?;
                Ok(true)
            }
            Command::Unknown(byte) => {
                self.send_error(1047, b"HY000", &format!("Unknown command: {byte}")).await?;
                Ok(true)
            }
        }
    }

    async fn handle_query(&mut self, query: &str) -> Result<(), SessionError> {
        match self.query_handler.handle_query(query, &self.database).await {
            Ok(QueryOutcome::Ok {
                affected_rows,
                last_insert_id,
                info,
            }) => {
                let ok = self
                    .builder
                    .build_ok(affected_rows, last_insert_id, &info)
                    .map_err(|e| SessionError::protocol(e.to_string()))?;
                self.send(ok).await
            }
            Ok(QueryOutcome::ResultSet { columns, rows }) => self.emit_result_set(&columns, &rows).await,
            Err(err) => {
                let code = err.mysql_code().unwrap_or(1105);
                let client_message = err.client_message();
                let message = if client_message.is_empty() {
                    crate::error::default_message(code).to_string()
                } else if code == 1105 {
                    format!("Internal error: {client_message}")
                } else {
                    client_message
                };
                self.send_error(code, err.sql_state(), &message).await
            }
        }
    }

    async fn emit_result_set(
        &mut self,
        columns: &[crate::protocol::builder::ColumnSpec],
        rows: &[Vec<Option<Vec<u8>>>],
    ) -> Result<(), SessionError> {
        let count = self
            .builder
            .build_column_count(columns.len() as u64)
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        self.send(count).await?;

        for column in columns {
            let def = self
                .builder
                .build_column_definition(column)
                .map_err(|e| SessionError::protocol(e.to_string()))?;
            self.send(def).await?;
        }

        let eof = self
            .builder
            .build_eof()
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        self.send(eof).await?;

        for row in rows {
            let values: Vec<Option<bytes::Bytes>> = row
                .iter()
                .map(|v| v.as_ref().map(|bytes| bytes::Bytes::copy_from_slice(bytes)))
                .collect();
            let row_packet = self
                .builder
                .build_text_row(&values)
                .map_err(|e| SessionError::protocol(e.to_string()))?;
            self.send(row_packet).await?;
        }

        let eof = self
            .builder
            .build_eof()
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        self.send(eof).await
    }

    async fn send_error(&mut self, code: u16, sql_state: &[u8; 5], message: &str) -> Result<(), SessionError> {
        let packet = self
            .builder
            .build_error(code, sql_state, message)
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        self.send(packet).await
    }

    async fn send(&mut self, packet: BytesMut) -> Result<(), SessionError> {
        let len = packet.len() as u64;
        self.stream.write_all(&packet).await?;
        self.stream.flush().await?;
        self.manager.record_activity(self.connection_id, len, 0, 0).await;
        Ok(())
    }

    /// Reads one full packet off the wire, returning `Ok(None)` on a clean
    /// EOF (the client closed the socket between commands).
    async fn read_packet(&mut self) -> Result<Option<RawPacket>, SessionError> {
        loop {
            if let Some(packet) = try_read_packet(&mut self.read_buf).map_err(|e| SessionError::protocol(e.to_string()))? {
                self.manager
                    .record_activity(self.connection_id, 0, (packet.payload.len() + 4) as u64, 0)
                    .await;
                return Ok(Some(packet));
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn close(mut self) {
        let _ = self.stream.shutdown().await;
        tracing::info!(connection_id = self.connection_id, "connection closed");
    }
}

/// The capability mask this server advertises and requires, exported for
/// callers that want to check `response.capability_flags` against it.
pub const REQUIRED_CAPABILITIES: u32 = CAP_PROTOCOL_41;

/// A 20-byte per-connection auth seed. No real challenge-response
/// algorithm is implemented (spec.md Non-goals), so this only needs to be
/// distinguishable across connections, not cryptographically random.
fn auth_seed(connection_id: u32) -> [u8; 20] {
    let mut seed = [0u8; 20];
    let mut state = connection_id.wrapping_mul(2_654_435_761).wrapping_add(0x9e3779b9);
    for byte in seed.iter_mut() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *byte = (state & 0x7f) as u8 + 1; // never NUL, matches a real seed's constraint
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_seed_is_deterministic_and_never_contains_nul() {
        let seed = auth_seed(42);
        assert_eq!(seed, auth_seed(42));
        assert!(seed.iter().all(|&b| b != 0));
    }

    #[test]
    fn auth_seed_differs_across_connections() {
        assert_ne!(auth_seed(1), auth_seed(2));
    }
}
