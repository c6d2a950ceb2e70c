//! Stateful packet builder: the emitter half of the protocol, owned by a
//! single session and responsible for tracking the sequence id across a
//! command round trip.

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};

use super::packet::{
    write_lenenc_int, write_lenenc_string, write_packet_header, CAP_CONNECT_WITH_DB,
    CAP_PLUGIN_AUTH, CAP_PROTOCOL_41, CAP_SECURE_CONNECTION, CHARSET_UTF8_GENERAL_CI,
};

/// A single result-set column definition, server -> client direction only.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: u8,
    pub column_length: u32,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: u8) -> Self {
        Self {
            name: name.into(),
            column_type,
            column_length: 255,
            flags: 0,
            decimals: 0,
        }
    }
}

/// MySQL column type codes this crate emits.
pub mod column_type {
    pub const VAR_STRING: u8 = 0xfd;
    pub const LONGLONG: u8 = 0x08;
}

/// Emits packets for one connection, tracking the packet sequence id.
///
/// The sequence id must restart at 0 for every new command round trip
/// (client request, then every packet the server sends in reply) and is
/// never shared across connections.
pub struct PacketBuilder {
    sequence_id: u8,
    capability_flags: u32,
}

impl PacketBuilder {
    /// Defaults `capability_flags` to `CAP_PROTOCOL_41`: this server always
    /// requires it (spec.md §6), so packets built before a handshake
    /// response is parsed — e.g. a pre-auth ERR — stay spec-compliant
    /// rather than silently dropping the SQL-state field.
    pub fn new() -> Self {
        Self {
            sequence_id: 0,
            capability_flags: CAP_PROTOCOL_41,
        }
    }

    pub fn set_capability_flags(&mut self, flags: u32) {
        self.capability_flags = flags;
    }

    pub fn capability_flags(&self) -> u32 {
        self.capability_flags
    }

    /// Claims the next sequence id, observing the id a client packet arrived
    /// with so replies continue the same round trip.
    pub fn sync_sequence(&mut self, client_sequence_id: u8) {
        self.sequence_id = client_sequence_id.wrapping_add(1);
    }

    /// Resets the counter to 0, starting a fresh command round trip.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    fn next_sequence_id(&mut self) -> u8 {
        let id = self.sequence_id;
        self.sequence_id = self.sequence_id.wrapping_add(1);
        id
    }

    /// Encodes the initial HandshakeV10 packet.
    ///
    /// `auth_seed` must be exactly 20 bytes: 8 bytes sent inline, 12 sent as
    /// auth-plugin-data-part-2. `auth_plugin_data_len` is encoded as 21 (one
    /// more than the 20 real seed bytes) — a preserved compatibility wart
    /// some clients expect and none strictly validate.
    pub fn build_handshake(
        &mut self,
        connection_id: u32,
        server_version: &str,
        auth_seed: &[u8; 20],
    ) -> Result<BytesMut> {
        let mut payload = BytesMut::new();
        payload.put_u8(10); // protocol version
        payload.put_slice(server_version.as_bytes());
        payload.put_u8(0);
        payload.put_u32_le(connection_id);
        payload.put_slice(&auth_seed[..8]);
        payload.put_u8(0); // filler

        let capabilities =
            CAP_PROTOCOL_41 | CAP_SECURE_CONNECTION | CAP_CONNECT_WITH_DB | CAP_PLUGIN_AUTH;
        payload.put_u16_le((capabilities & 0xffff) as u16);
        payload.put_u8(CHARSET_UTF8_GENERAL_CI);
        payload.put_u16_le(0x0002); // status flags: SERVER_STATUS_AUTOCOMMIT
        payload.put_u16_le(((capabilities >> 16) & 0xffff) as u16);
        payload.put_u8(21); // auth_plugin_data_len wart: 20 real bytes, encoded as 21
        payload.put_slice(&[0u8; 10]); // reserved
        payload.put_slice(&auth_seed[8..]);
        payload.put_u8(0);
        payload.put_slice(b"mysql_native_password");
        payload.put_u8(0);

        let mut dst = BytesMut::new();
        write_packet_header(&mut dst, payload.len(), self.next_sequence_id())?;
        dst.put_slice(&payload);
        Ok(dst)
    }

    pub fn build_ok(
        &mut self,
        affected_rows: u64,
        last_insert_id: u64,
        info: &str,
    ) -> Result<BytesMut> {
        let mut payload = BytesMut::new();
        payload.put_u8(0x00);
        write_lenenc_int(&mut payload, affected_rows);
        write_lenenc_int(&mut payload, last_insert_id);

        if self.capability_flags & CAP_PROTOCOL_41 != 0 {
            payload.put_u16_le(0x0002); // status flags: autocommit
            payload.put_u16_le(0); // warnings
        }
        payload.put_slice(info.as_bytes());

        let mut dst = BytesMut::new();
        write_packet_header(&mut dst, payload.len(), self.next_sequence_id())?;
        dst.put_slice(&payload);
        Ok(dst)
    }

    pub fn build_error(
        &mut self,
        error_code: u16,
        sql_state: &[u8; 5],
        message: &str,
    ) -> Result<BytesMut> {
        let mut payload = BytesMut::new();
        payload.put_u8(0xff);
        payload.put_u16_le(error_code);

        if self.capability_flags & CAP_PROTOCOL_41 != 0 {
            payload.put_u8(b'#');
            payload.put_slice(sql_state);
        }
        payload.put_slice(message.as_bytes());

        let mut dst = BytesMut::new();
        write_packet_header(&mut dst, payload.len(), self.next_sequence_id())?;
        dst.put_slice(&payload);
        Ok(dst)
    }

    pub fn build_eof(&mut self) -> Result<BytesMut> {
        let mut payload = BytesMut::new();
        payload.put_u8(0xfe);
        payload.put_u16_le(0); // warnings
        payload.put_u16_le(0x0002); // status flags

        let mut dst = BytesMut::new();
        write_packet_header(&mut dst, payload.len(), self.next_sequence_id())?;
        dst.put_slice(&payload);
        Ok(dst)
    }

    /// The column-count packet that begins a text-protocol result set.
    pub fn build_column_count(&mut self, count: u64) -> Result<BytesMut> {
        let mut payload = BytesMut::new();
        write_lenenc_int(&mut payload, count);

        let mut dst = BytesMut::new();
        write_packet_header(&mut dst, payload.len(), self.next_sequence_id())?;
        dst.put_slice(&payload);
        Ok(dst)
    }

    pub fn build_column_definition(&mut self, col: &ColumnSpec) -> Result<BytesMut> {
        let mut payload = BytesMut::new();
        write_lenenc_string(&mut payload, b"def"); // catalog
        write_lenenc_string(&mut payload, b"hchdb"); // schema
        write_lenenc_string(&mut payload, b""); // table
        write_lenenc_string(&mut payload, b""); // org_table
        write_lenenc_string(&mut payload, col.name.as_bytes());
        write_lenenc_string(&mut payload, col.name.as_bytes()); // org_name
        payload.put_u8(0x0c); // length of the fixed fields below
        payload.put_u16_le(CHARSET_UTF8_GENERAL_CI as u16);
        payload.put_u32_le(col.column_length);
        payload.put_u8(col.column_type);
        payload.put_u16_le(col.flags);
        payload.put_u8(col.decimals);
        payload.put_u16(0); // filler

        let mut dst = BytesMut::new();
        write_packet_header(&mut dst, payload.len(), self.next_sequence_id())?;
        dst.put_slice(&payload);
        Ok(dst)
    }

    pub fn build_text_row(&mut self, values: &[Option<Bytes>]) -> Result<BytesMut> {
        let mut payload = BytesMut::new();
        for value in values {
            match value {
                Some(v) => write_lenenc_string(&mut payload, v),
                None => payload.put_u8(0xfb),
            }
        }

        let mut dst = BytesMut::new();
        write_packet_header(&mut dst, payload.len(), self.next_sequence_id())?;
        dst.put_slice(&payload);
        Ok(dst)
    }
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}
