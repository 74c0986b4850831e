//! Real-time chat broadcast hub: connection registry, broadcast engine and the
//! WebSocket transport around them.

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
