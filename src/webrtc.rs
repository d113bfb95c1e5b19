//! Media engine backed by webrtc-rs: one `RTCPeerConnection` per peer.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use crate::error::{Error, Result};
use crate::media::{
    IncomingStream, MediaBinding, MediaEngine, MediaEvent, MediaEventSender, MediaSink, SdpKind,
    SessionDescription, StreamParams,
};

/// Track id given to every forwarded audio track; the stream id carries the
/// source identity.
const RELAY_TRACK_ID: &str = "audio";

pub struct RtcEngine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl RtcEngine {
    pub fn new(stun_servers: &[String]) -> Result<Self> {
        let mut codecs = CodecRegistry::default();
        codecs.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut codecs)?;

        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: stun_servers.to_vec(),
                ..Default::default()
            }]
        };
        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl MediaEngine for RtcEngine {
    async fn create_binding(
        &self,
        owner: &str,
        events: MediaEventSender,
    ) -> Result<Arc<dyn MediaBinding>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);

        let candidates = events.clone();
        let peer = owner.to_owned();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidates = candidates.clone();
            let peer = peer.clone();
            Box::pin(async move {
                // None marks the end of gathering.
                let Some(candidate) = candidate else { return };
                let json = candidate
                    .to_json()
                    .map_err(Error::from)
                    .and_then(|init| serde_json::to_value(init).map_err(Error::from));
                match json {
                    Ok(value) => {
                        let _ = candidates.send(MediaEvent::LocalCandidate(value));
                    }
                    Err(e) => debug!(%peer, error = %e, "could not serialize local candidate"),
                }
            })
        }));

        let streams = events;
        let peer = owner.to_owned();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let streams = streams.clone();
            let peer = peer.clone();
            Box::pin(async move {
                info!(
                    %peer,
                    kind = %track.kind(),
                    ssrc = track.ssrc(),
                    "remote track started"
                );
                let stream = Arc::new(RtcIncomingStream { track });
                let _ = streams.send(MediaEvent::IncomingStream(stream));
            })
        }));

        let peer = owner.to_owned();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let peer = peer.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                        warn!(%peer, %state, "peer connection state changed")
                    }
                    _ => debug!(%peer, %state, "peer connection state changed"),
                }
            })
        }));

        Ok(Arc::new(RtcBinding {
            owner: owner.to_owned(),
            pc,
        }))
    }
}

pub struct RtcBinding {
    owner: String,
    pc: Arc<RTCPeerConnection>,
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    })
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(Error::Negotiation(format!(
            "unsupported description type {other}"
        ))),
    }
}

#[async_trait]
impl MediaBinding for RtcBinding {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn gathering_complete(&self) {
        let mut done = self.pc.gathering_complete_promise().await;
        let _ = done.recv().await;
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        from_rtc(desc).ok()
    }

    async fn add_remote_candidate(&self, candidate: Value) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)?;
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn create_sink(&self, source: &str, params: &StreamParams) -> Result<Arc<dyn MediaSink>> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            params.clone(),
            RELAY_TRACK_ID.to_owned(),
            source.to_owned(),
        ));
        Ok(Arc::new(RtcSink {
            source: source.to_owned(),
            track,
        }))
    }

    async fn attach_sink(&self, sink: Arc<dyn MediaSink>) -> Result<()> {
        let sink = sink
            .as_any()
            .downcast_ref::<RtcSink>()
            .ok_or_else(|| Error::Negotiation("sink was not created by this engine".into()))?;
        let sender = self
            .pc
            .add_track(Arc::clone(&sink.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP has to be read for the interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        debug!(peer = %self.owner, source = %sink.source, "relay track attached");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Forwarding track towards one destination for one source.
pub struct RtcSink {
    source: String,
    track: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl MediaSink for RtcSink {
    fn source(&self) -> &str {
        &self.source
    }

    async fn write(&self, packet: &Packet) -> Result<()> {
        self.track.write_rtp(packet).await?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct RtcIncomingStream {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl IncomingStream for RtcIncomingStream {
    fn params(&self) -> StreamParams {
        self.track.codec().capability
    }

    async fn read_packet(&self) -> Result<Packet> {
        let (packet, _) = self.track.read_rtp().await?;
        Ok(packet)
    }
}
