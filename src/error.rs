use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

use crate::auth::AuthError;

/// Reasons a connection is refused during the join handshake.
///
/// Every variant is fatal to the connection that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinRejection {
    #[error("first message is not a join")]
    NotAJoin,
    #[error("join without a room id")]
    MissingRoom,
    #[error("join without a credential token")]
    MissingToken,
    #[error("credential rejected")]
    InvalidCredential,
    #[error("no profile for account")]
    UnknownAccount,
    #[error("account already present in room")]
    DuplicateMember,
    #[error("join message could not be decoded")]
    Malformed,
    #[error("connection closed before join")]
    ConnectionClosed,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("join rejected: {0}")]
    Join(#[from] JoinRejection),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("signaling protocol violation: {0}")]
    Protocol(String),

    #[error("media stream ended")]
    EndOfStream,

    #[error("transport closed")]
    TransportClosed,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
