//! MySQL wire protocol implementation.
//!
//! Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basics.html
//!
//! The protocol is split into three layers, matching the server-side role of
//! this crate (it terminates MySQL connections, it does not proxy them):
//! - [`packet`]: frame and length-encoded-value primitives, shared by both directions.
//! - [`builder`]: stateful emitter for packets this server sends to a client.
//! - [`parser`]: stateless decoders for packets a client sends to this server.

pub mod builder;
pub mod packet;
pub mod parser;

pub use packet::{
    CAP_CONNECT_WITH_DB, CAP_DEPRECATE_EOF, CAP_PLUGIN_AUTH, CAP_PLUGIN_AUTH_LENENC_CLIENT_DATA,
    CAP_PROTOCOL_41, CAP_SECURE_CONNECTION,
};
