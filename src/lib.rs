//! Selective-forwarding voice relay: clients join rooms over a WebSocket
//! signaling channel, and every audio stream a member publishes is
//! forwarded to the other members of its room.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod metrics;
pub mod peer;
pub mod relay;
pub mod room;
pub mod server;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use crate::config::ServerConfig;
pub use crate::error::{Error, JoinRejection, Result};
pub use crate::server::SignalingServer;
pub use crate::session::ServerContext;
