//! HchDB: a MySQL wire-protocol server core. The binary in `main.rs` is a
//! thin CLI wrapper around the pieces exposed here; integration tests spawn
//! the same pieces directly rather than shelling out to a running process.

pub mod auth;
pub mod config;
pub mod error;
pub mod listener;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod protocol;
pub mod responder;
pub mod server;
pub mod session;
