//! Stateless decoders for packets a client sends to this server: the
//! handshake response and COM_* command packets.

use anyhow::{bail, Result};
use bytes::{Buf, Bytes, BytesMut};

use super::packet::{read_lenenc_int, read_null_terminated_string, CAP_PLUGIN_AUTH_LENENC_CLIENT_DATA};

/// The fixed-size prefix every handshake response carries before the
/// variable-length username: 4 (capabilities) + 4 (max packet size) + 1
/// (charset) + 23 (reserved).
const FIXED_PREFIX_LEN: usize = 4 + 4 + 1 + 23;

#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

pub fn parse_handshake_response(buf: &mut BytesMut) -> Result<HandshakeResponse> {
    if buf.len() < FIXED_PREFIX_LEN {
        bail!("short packet: handshake response shorter than the fixed-size prefix");
    }

    let capability_flags = buf.get_u32_le();
    let max_packet_size = buf.get_u32_le();
    let character_set = buf.get_u8();
    buf.advance(23); // reserved

    let username = read_null_terminated_string(buf)?;

    let auth_response = if capability_flags & CAP_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        let len = read_lenenc_int(buf)? as usize;
        if buf.len() < len {
            bail!("short packet: auth response length exceeds remaining payload");
        }
        buf.split_to(len).to_vec()
    } else {
        let pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let data = buf.split_to(pos).to_vec();
        if buf.has_remaining() {
            buf.advance(1);
        }
        data
    };

    const CLIENT_CONNECT_WITH_DB: u32 = 0x0008;
    let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && buf.has_remaining() {
        Some(read_null_terminated_string(buf).unwrap_or_default())
    } else {
        None
    };

    let auth_plugin_name = if capability_flags & super::packet::CAP_PLUGIN_AUTH != 0
        && buf.has_remaining()
    {
        Some(read_null_terminated_string(buf).unwrap_or_default())
    } else {
        None
    };

    Ok(HandshakeResponse {
        capability_flags,
        max_packet_size,
        character_set,
        username,
        auth_response,
        database,
        auth_plugin_name,
    })
}

/// MySQL command identifiers this server recognizes. Anything else is
/// reported as `Unknown` and answered with an ERR packet (error 1047).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    InitDb(String),
    Query(String),
    FieldList(String),
    Ping,
    Unknown(u8),
}

const COM_QUIT: u8 = 0x01;
const COM_INIT_DB: u8 = 0x02;
const COM_QUERY: u8 = 0x03;
const COM_FIELD_LIST: u8 = 0x04;
const COM_PING: u8 = 0x0e;

/// Parses one command packet's payload. An empty payload is itself a
/// protocol error (no command byte present) and must be reported to the
/// caller as such, not silently treated as `Unknown`.
pub fn parse_command(payload: Bytes) -> Option<Command> {
    if payload.is_empty() {
        return None;
    }

    let command_byte = payload[0];
    let body = payload.slice(1..);

    Some(match command_byte {
        COM_QUIT => Command::Quit,
        COM_INIT_DB => Command::InitDb(String::from_utf8_lossy(&body).to_string()),
        COM_QUERY => Command::Query(String::from_utf8_lossy(&body).to_string()),
        COM_FIELD_LIST => Command::FieldList(String::from_utf8_lossy(&body).to_string()),
        COM_PING => Command::Ping,
        other => Command::Unknown(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn empty_payload_is_not_a_command() {
        assert_eq!(parse_command(Bytes::new()), None);
    }

    #[test]
    fn query_command_carries_the_sql_text() {
        let mut payload = vec![COM_QUERY];
        payload.extend_from_slice(b"SELECT 1");
        let cmd = parse_command(Bytes::from(payload)).unwrap();
        assert_eq!(cmd, Command::Query("SELECT 1".to_string()));
    }

    #[test]
    fn ping_has_no_body() {
        let cmd = parse_command(Bytes::from(vec![COM_PING])).unwrap();
        assert_eq!(cmd, Command::Ping);
    }

    #[test]
    fn unrecognized_command_byte_is_unknown() {
        let cmd = parse_command(Bytes::from(vec![0x99])).unwrap();
        assert_eq!(cmd, Command::Unknown(0x99));
    }

    #[test]
    fn handshake_response_reads_username_and_lenenc_auth_response() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&(super::super::packet::CAP_PLUGIN_AUTH_LENENC_CLIENT_DATA
            | super::super::packet::CAP_PROTOCOL_41)
            .to_le_bytes());
        payload.extend_from_slice(&16_777_216u32.to_le_bytes());
        payload.extend_from_slice(&[0x2d]); // utf8mb4 character set
        payload.extend_from_slice(&[0u8; 23]);
        payload.extend_from_slice(b"root\0");
        payload.extend_from_slice(&[4u8]); // auth response length
        payload.extend_from_slice(b"abcd");

        let parsed = parse_handshake_response(&mut payload).unwrap();
        assert_eq!(parsed.username, "root");
        assert_eq!(parsed.auth_response, b"abcd".to_vec());
        assert!(parsed.database.is_none());
    }

    /// Without `CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA`, the auth response is
    /// null-terminated even when `CLIENT_SECURE_CONNECTION` is set — every
    /// conformant client hits this path since the server requires that
    /// capability unconditionally.
    #[test]
    fn handshake_response_reads_null_terminated_auth_response_without_lenenc_flag() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&(super::super::packet::CAP_SECURE_CONNECTION
            | super::super::packet::CAP_PROTOCOL_41)
            .to_le_bytes());
        payload.extend_from_slice(&16_777_216u32.to_le_bytes());
        payload.extend_from_slice(&[0x2d]);
        payload.extend_from_slice(&[0u8; 23]);
        payload.extend_from_slice(b"root\0");
        payload.extend_from_slice(&[7u8, 9u8, 3u8]); // scramble whose first byte would be misread as a LEI length
        payload.extend_from_slice(b"\0"); // null terminator for the auth response

        let parsed = parse_handshake_response(&mut payload).unwrap();
        assert_eq!(parsed.username, "root");
        assert_eq!(parsed.auth_response, vec![7u8, 9u8, 3u8]);
        assert!(parsed.database.is_none());
    }

    #[test]
    fn truncated_handshake_response_is_a_short_packet_error_not_a_panic() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&[0u8; 5]); // far short of the fixed prefix
        assert!(parse_handshake_response(&mut payload).is_err());
    }

    #[test]
    fn auth_response_length_exceeding_payload_is_an_error_not_a_panic() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&super::super::packet::CAP_PLUGIN_AUTH_LENENC_CLIENT_DATA.to_le_bytes());
        payload.extend_from_slice(&16_777_216u32.to_le_bytes());
        payload.extend_from_slice(&[0x2d]);
        payload.extend_from_slice(&[0u8; 23]);
        payload.extend_from_slice(b"root\0");
        payload.extend_from_slice(&[250u8]); // claims 250 bytes of auth data, none present
        assert!(parse_handshake_response(&mut payload).is_err());
    }
}
