//! termlink-server: HTTP API and duplex gateway for the terminal server.
//!
//! The HTTP side handles login (one-time tokens or the fixed master
//! credential), the session cookie, and link-token issuance. The gateway
//! side accepts WebSocket connections, binds one terminal session per
//! connection, and bridges protocol messages to the PTY manager.

pub mod config;
pub mod gateway;
pub mod http;
pub mod protocol;
pub mod state;
