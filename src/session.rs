//! Per-connection join protocol and signaling dispatch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::{CredentialValidator, ProfileDirectory};
use crate::error::{JoinRejection, Result};
use crate::media::{MediaEngine, SdpKind};
use crate::peer::Peer;
use crate::room::{MembershipError, Room, RoomRegistry};
use crate::signaling::{MessageKind, SignalMessage};
use crate::transport::Transport;

/// Everything a connection needs from the rest of the process.
pub struct ServerContext {
    pub registry: Arc<RoomRegistry>,
    pub credentials: Arc<dyn CredentialValidator>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub engine: Arc<dyn MediaEngine>,
}

enum Flow {
    Continue,
    Stop,
}

/// Drives one client from its first message to teardown.
pub async fn serve_connection(ctx: Arc<ServerContext>, transport: Arc<dyn Transport>) {
    let peer = match join(&ctx, Arc::clone(&transport)).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!(error = %e, "connection rejected");
            transport.close().await;
            return;
        }
    };
    read_loop(&peer).await;
    peer.close().await;
}

/// Runs the join handshake. On success the returned peer is a room member
/// and, if the join carried an offer, has already been answered.
pub async fn join(ctx: &ServerContext, transport: Arc<dyn Transport>) -> Result<Arc<Peer>> {
    let raw = transport
        .recv()
        .await?
        .ok_or(JoinRejection::ConnectionClosed)?;
    let msg: SignalMessage = serde_json::from_str(&raw).map_err(|_| JoinRejection::Malformed)?;
    if msg.kind != MessageKind::Join {
        return Err(JoinRejection::NotAJoin.into());
    }
    let room_id = msg.room_id().ok_or(JoinRejection::MissingRoom)?;
    let token = msg.bearer_token().ok_or(JoinRejection::MissingToken)?;

    let identity = ctx.credentials.validate_token(token).await.map_err(|e| {
        debug!(error = %e, "credential validation failed");
        JoinRejection::InvalidCredential
    })?;
    let profile = ctx.profiles.lookup_profile(&identity).await.map_err(|e| {
        debug!(account = %identity, error = %e, "profile lookup failed");
        JoinRejection::UnknownAccount
    })?;

    let mut room = ctx.registry.get_or_create(room_id);
    if room.has_member(&identity) {
        return Err(JoinRejection::DuplicateMember.into());
    }
    let peer = Peer::new(
        identity,
        profile.display_name,
        transport,
        Arc::clone(&ctx.engine),
    );
    admit(&ctx.registry, &mut room, &peer)?;

    if let Some(offer) = msg.sdp_of(SdpKind::Offer) {
        if let Err(e) = peer.answer_offer(offer).await {
            peer.close().await;
            return Err(e);
        }
    }
    info!(peer = %peer.identity(), room = %room.id(), "peer ready");
    Ok(peer)
}

/// Authoritative membership insert. A room that retired between lookup and
/// insert is swapped for the registry's fresh instance.
fn admit(registry: &Arc<RoomRegistry>, room: &mut Arc<Room>, peer: &Arc<Peer>) -> Result<()> {
    loop {
        match room.add_member(peer) {
            Ok(_) => return Ok(()),
            Err(MembershipError::Duplicate) => return Err(JoinRejection::DuplicateMember.into()),
            Err(MembershipError::Retired) => *room = registry.get_or_create(room.id()),
        }
    }
}

/// Processes signaling messages in arrival order until the client leaves,
/// the transport fails, or a fatal message arrives.
pub async fn read_loop(peer: &Arc<Peer>) {
    loop {
        let raw = match peer.recv().await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(peer = %peer.identity(), "signaling channel closed");
                break;
            }
            Err(e) => {
                warn!(peer = %peer.identity(), error = %e, "signaling read failed");
                break;
            }
        };
        let msg = match serde_json::from_str::<SignalMessage>(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(peer = %peer.identity(), error = %e, "undecodable signaling message");
                continue;
            }
        };
        if let Flow::Stop = dispatch(peer, msg).await {
            break;
        }
    }
}

async fn dispatch(peer: &Arc<Peer>, msg: SignalMessage) -> Flow {
    match msg.kind {
        MessageKind::Offer => match msg.sdp_of(SdpKind::Offer) {
            Some(offer) => match peer.answer_offer(offer).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Stop,
            },
            None => {
                warn!(peer = %peer.identity(), "malformed offer");
                Flow::Stop
            }
        },
        MessageKind::Answer => {
            match msg.sdp_of(SdpKind::Answer) {
                Some(answer) => peer.apply_answer(answer).await,
                None => warn!(peer = %peer.identity(), "answer without usable sdp, ignored"),
            }
            Flow::Continue
        }
        MessageKind::Candidate => {
            peer.add_remote_candidate(msg.candidate).await;
            Flow::Continue
        }
        MessageKind::Leave => {
            info!(peer = %peer.identity(), "peer left");
            Flow::Stop
        }
        MessageKind::Join | MessageKind::CandidateFromServer | MessageKind::Unknown => {
            warn!(peer = %peer.identity(), kind = ?msg.kind, "unexpected message type, ignored");
            Flow::Continue
        }
    }
}
