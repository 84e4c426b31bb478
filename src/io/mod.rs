// src/io/mod.rs
//
// Adapter IO: the debug channel TCP connection, the splitter chain that
// carves frames out of the byte stream, and the debug channel message layer.

pub mod connection;
pub mod debug_channel;
mod error;
pub mod splitter;
mod subscription;

pub use connection::{AdapterConnection, ConnectionEnd, ConnectionListener};
pub use error::IoError;
pub use subscription::Subscription;

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
