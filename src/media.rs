//! Media engine boundary.
//!
//! The relay core never touches ICE, DTLS or SRTP directly. It drives one
//! [`MediaBinding`] per peer through this trait family and receives the
//! binding's asynchronous notifications as [`MediaEvent`]s on a channel the
//! peer owns, so no engine callback ever re-enters room or registry locks.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use crate::error::Result;

/// Codec parameters of a media stream, used to shape forwarding sinks.
pub type StreamParams = RTCRtpCodecCapability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Notifications raised by a binding.
pub enum MediaEvent {
    /// A locally gathered network candidate, already in its JSON form.
    LocalCandidate(Value),
    /// The remote client started sending a media stream.
    IncomingStream(Arc<dyn IncomingStream>),
}

impl fmt::Debug for MediaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            MediaEvent::IncomingStream(s) => f
                .debug_tuple("IncomingStream")
                .field(&s.params().mime_type)
                .finish(),
        }
    }
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

/// Factory for per-peer bindings.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Creates a binding for `owner`. Every event the binding raises is
    /// delivered on `events`.
    async fn create_binding(
        &self,
        owner: &str,
        events: MediaEventSender,
    ) -> Result<Arc<dyn MediaBinding>>;
}

/// One peer's media session.
#[async_trait]
pub trait MediaBinding: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Resolves once local candidate gathering has finished.
    async fn gathering_complete(&self);

    /// Current local description, including gathered transport parameters.
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_remote_candidate(&self, candidate: Value) -> Result<()>;

    /// Creates a sink that forwards `source`'s stream towards this binding's
    /// remote client. The sink is inert until attached.
    async fn create_sink(&self, source: &str, params: &StreamParams) -> Result<Arc<dyn MediaSink>>;

    async fn attach_sink(&self, sink: Arc<dyn MediaSink>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Per-destination, per-source forwarding target.
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Identity of the peer whose media this sink carries.
    fn source(&self) -> &str;

    async fn write(&self, packet: &Packet) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Media arriving from a peer.
#[async_trait]
pub trait IncomingStream: Send + Sync {
    fn params(&self) -> StreamParams;

    /// Next packet. Any error is end of stream.
    async fn read_packet(&self) -> Result<Packet>;
}

pub(crate) fn same_sink(a: &Arc<dyn MediaSink>, b: &Arc<dyn MediaSink>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
