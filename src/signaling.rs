use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media::{SdpKind, SessionDescription};

/// Discriminant carried in the `type` field of every signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Join,
    Offer,
    Answer,
    Candidate,
    Leave,
    /// Server to client only: a locally gathered network candidate.
    CandidateFromServer,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One JSON object exchanged over the signaling channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_type: Option<String>,
    /// Passed through uninterpreted until it reaches a media binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
    /// Ignored on input; the profile directory is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl SignalMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn join(room: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            token: Some(token.into()),
            ..Self::new(MessageKind::Join)
        }
    }

    pub fn leave() -> Self {
        Self::new(MessageKind::Leave)
    }

    pub fn description(desc: &SessionDescription) -> Self {
        let kind = match desc.kind {
            SdpKind::Offer => MessageKind::Offer,
            SdpKind::Answer => MessageKind::Answer,
        };
        Self {
            sdp: Some(desc.sdp.clone()),
            sdp_type: Some(desc.kind.to_string()),
            ..Self::new(kind)
        }
    }

    pub fn candidate_from_server(candidate: Value) -> Self {
        Self {
            candidate: Some(candidate),
            ..Self::new(MessageKind::CandidateFromServer)
        }
    }

    /// Non-empty room id, if any.
    pub fn room_id(&self) -> Option<&str> {
        self.room.as_deref().filter(|r| !r.is_empty())
    }

    /// Non-empty bearer token, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// SDP payload when the message carries a session description of the
    /// given kind. A missing `sdpType` is read as the kind implied by the
    /// message type.
    pub fn sdp_of(&self, kind: SdpKind) -> Option<&str> {
        let sdp = self.sdp.as_deref().filter(|s| !s.is_empty())?;
        match self.sdp_type.as_deref() {
            None => Some(sdp),
            Some(t) if t == kind.as_str() => Some(sdp),
            Some(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
