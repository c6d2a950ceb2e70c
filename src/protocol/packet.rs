//! Packet framing and length-encoded value primitives.
//!
//! A MySQL packet is a 3-byte little-endian payload length followed by a
//! 1-byte sequence id, followed by the payload itself.

use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const CAP_CONNECT_WITH_DB: u32 = 1 << 3;
pub const CAP_PROTOCOL_41: u32 = 1 << 9;
pub const CAP_SECURE_CONNECTION: u32 = 1 << 15;
pub const CAP_PLUGIN_AUTH: u32 = 1 << 19;
pub const CAP_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
pub const CAP_DEPRECATE_EOF: u32 = 1 << 24;

/// The largest payload a single packet frame can carry: the length field is
/// only 3 bytes wide.
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// Text protocol charset identifier this server advertises throughout: utf8_general_ci.
pub const CHARSET_UTF8_GENERAL_CI: u8 = 0x21;

/// Header-plus-payload slice of a single packet read off the wire.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub sequence_id: u8,
    pub payload: BytesMut,
}

/// Attempt to split one full packet off the front of `src`.
///
/// Returns `Ok(None)` when `src` does not yet contain a full packet; the
/// caller should read more bytes and try again.
pub fn try_read_packet(src: &mut BytesMut) -> Result<Option<RawPacket>> {
    if src.len() < 4 {
        return Ok(None);
    }

    let payload_len = (src[0] as usize) | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);
    let sequence_id = src[3];
    let total_len = 4 + payload_len;

    if src.len() < total_len {
        src.reserve(total_len - src.len());
        return Ok(None);
    }

    let mut packet = src.split_to(total_len);
    packet.advance(4);

    Ok(Some(RawPacket {
        sequence_id,
        payload: packet,
    }))
}

/// Writes the 4-byte packet header. Fails if `payload_len` cannot fit in the
/// 3-byte length field rather than silently truncating it.
pub fn write_packet_header(dst: &mut BytesMut, payload_len: usize, sequence_id: u8) -> Result<()> {
    if payload_len > MAX_PAYLOAD_LEN {
        bail!("payload of {payload_len} bytes exceeds the maximum frame length of {MAX_PAYLOAD_LEN}");
    }
    dst.put_u8((payload_len & 0xff) as u8);
    dst.put_u8(((payload_len >> 8) & 0xff) as u8);
    dst.put_u8(((payload_len >> 16) & 0xff) as u8);
    dst.put_u8(sequence_id);
    Ok(())
}

/// Reads a length-encoded integer from the front of `buf` without consuming it.
/// Returns the value and the number of bytes it occupies.
pub fn peek_lenenc_int(buf: &[u8]) -> Result<(u64, usize)> {
    if buf.is_empty() {
        bail!("empty buffer for length-encoded integer");
    }

    match buf[0] {
        0..=0xfa => Ok((buf[0] as u64, 1)),
        0xfb => Ok((0, 1)), // NULL marker in row data
        0xfc => {
            if buf.len() < 3 {
                bail!("not enough bytes for a 2-byte length-encoded integer");
            }
            Ok(((buf[1] as u64) | ((buf[2] as u64) << 8), 3))
        }
        0xfd => {
            if buf.len() < 4 {
                bail!("not enough bytes for a 3-byte length-encoded integer");
            }
            Ok((
                (buf[1] as u64) | ((buf[2] as u64) << 8) | ((buf[3] as u64) << 16),
                4,
            ))
        }
        0xfe => {
            if buf.len() < 9 {
                bail!("not enough bytes for an 8-byte length-encoded integer");
            }
            let mut val = 0u64;
            for i in 0..8 {
                val |= (buf[1 + i] as u64) << (8 * i);
            }
            Ok((val, 9))
        }
        0xff => bail!("invalid length-encoded integer marker 0xff"),
    }
}

pub fn read_lenenc_int(buf: &mut impl Buf) -> Result<u64> {
    let first = buf.chunk().first().copied();
    let Some(first) = first else {
        bail!("empty buffer for length-encoded integer");
    };

    match first {
        0..=0xfa => {
            buf.advance(1);
            Ok(first as u64)
        }
        0xfb => {
            buf.advance(1);
            Ok(0)
        }
        0xfc => {
            buf.advance(1);
            Ok(buf.get_u16_le() as u64)
        }
        0xfd => {
            buf.advance(1);
            let b0 = buf.get_u8() as u64;
            let b1 = buf.get_u8() as u64;
            let b2 = buf.get_u8() as u64;
            Ok(b0 | (b1 << 8) | (b2 << 16))
        }
        0xfe => {
            buf.advance(1);
            Ok(buf.get_u64_le())
        }
        0xff => bail!("invalid length-encoded integer marker 0xff"),
    }
}

/// Writes a length-encoded integer using the minimal tag/width for `val`.
///
/// `val < 251` is written as a single byte; `val < 2^16` as `0xfc` plus 2
/// little-endian bytes; `val < 2^24` as `0xfd` plus exactly 3 little-endian
/// bytes; anything larger as `0xfe` plus 8 little-endian bytes.
pub fn write_lenenc_int(dst: &mut BytesMut, val: u64) {
    if val < 251 {
        dst.put_u8(val as u8);
    } else if val < 65_536 {
        dst.put_u8(0xfc);
        dst.put_u16_le(val as u16);
    } else if val < 16_777_216 {
        dst.put_u8(0xfd);
        dst.put_u8((val & 0xff) as u8);
        dst.put_u8(((val >> 8) & 0xff) as u8);
        dst.put_u8(((val >> 16) & 0xff) as u8);
    } else {
        dst.put_u8(0xfe);
        dst.put_u64_le(val);
    }
}

pub fn write_lenenc_string(dst: &mut BytesMut, s: &[u8]) {
    write_lenenc_int(dst, s.len() as u64);
    dst.put_slice(s);
}

pub fn read_lenenc_string(buf: &mut BytesMut) -> Result<Bytes> {
    let len = read_lenenc_int(buf)? as usize;
    if buf.len() < len {
        bail!("not enough bytes for a length-encoded string");
    }
    Ok(buf.split_to(len).freeze())
}

pub fn read_null_terminated_string(buf: &mut BytesMut) -> Result<String> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| anyhow::anyhow!("missing null terminator"))?;
    let s = String::from_utf8(buf.split_to(pos).to_vec())?;
    buf.advance(1);
    Ok(s)
}
