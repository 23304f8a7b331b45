//! WebSocket wire protocol.
//!
//! Inbound frames are JSON objects discriminated by `type`. The relay only
//! interprets a handful of types; everything else is forwarded untouched so
//! clients can add message types without a server release.
//!
//! Outbound server events use `snake_case` type tags and `camelCase` fields.

use crate::store::{JoinRequestRecord, ParticipantRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// WebSocket close codes sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Explicit leave.
    Normal,
    /// Server shutdown.
    GoingAway,
    /// Unexpected server-side failure.
    InternalError,
    /// Missing or invalid session token.
    Unauthorized,
    /// Caller is neither a member nor a pending requester.
    NotAMember,
    /// Room does not exist.
    RoomNotFound,
    /// Room was deleted or expired while connected.
    RoomDeleted,
    /// A newer connection for the same participant replaced this one.
    Superseded,
    /// Pending join request was rejected.
    JoinRejected,
    /// No inbound activity within the idle window.
    IdleTimeout,
}

impl CloseCode {
    /// Numeric close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::InternalError => 1011,
            CloseCode::Unauthorized => 4001,
            CloseCode::NotAMember => 4003,
            CloseCode::RoomNotFound => 4004,
            CloseCode::RoomDeleted => 4005,
            CloseCode::Superseded => 4006,
            CloseCode::JoinRejected => 4007,
            CloseCode::IdleTimeout => 4008,
        }
    }

    /// Human-readable close reason.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            CloseCode::Normal => "Left room",
            CloseCode::GoingAway => "Server shutting down",
            CloseCode::InternalError => "Internal error",
            CloseCode::Unauthorized => "Invalid session",
            CloseCode::NotAMember => "Not a participant",
            CloseCode::RoomNotFound => "Room not found",
            CloseCode::RoomDeleted => "Room deleted",
            CloseCode::Superseded => "Replaced by a newer connection",
            CloseCode::JoinRejected => "Join request rejected",
            CloseCode::IdleTimeout => "Connection idle",
        }
    }
}

/// Participant as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    pub name: String,
    pub is_creator: bool,
    pub is_muted: bool,
    pub is_speaking: bool,
    pub joined_at: i64,
    pub connected: bool,
}

impl ParticipantView {
    #[must_use]
    pub fn from_record(record: &ParticipantRecord, connected: bool) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            is_creator: record.is_creator,
            is_muted: record.is_muted,
            is_speaking: record.is_speaking,
            joined_at: record.joined_at,
            connected,
        }
    }
}

/// Pending requester as shown to the room creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterView {
    pub id: String,
    pub name: String,
    pub requested_at: i64,
}

impl From<&JoinRequestRecord> for RequesterView {
    fn from(request: &JoinRequestRecord) -> Self {
        Self {
            id: request.participant_id.clone(),
            name: request.display_name.clone(),
            requested_at: request.requested_at,
        }
    }
}

/// Server-originated events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Pong,
    ParticipantsUpdate { participants: Vec<ParticipantView> },
    UserJoined { user: ParticipantView },
    UserLeft { participant_id: String },
    JoinRequest { user: RequesterView },
    JoinApproved { user: ParticipantView },
    JoinRejected { participant_id: String },
    RoomDeleted { room_id: String },
    SpeakingStatus { participant_id: String, is_speaking: bool },
}

impl ServerEvent {
    /// Event type tag, used as a bounded metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Pong => "pong",
            ServerEvent::ParticipantsUpdate { .. } => "participants_update",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::JoinRequest { .. } => "join_request",
            ServerEvent::JoinApproved { .. } => "join_approved",
            ServerEvent::JoinRejected { .. } => "join_rejected",
            ServerEvent::RoomDeleted { .. } => "room_deleted",
            ServerEvent::SpeakingStatus { .. } => "speaking_status",
        }
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Point-to-point signaling subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "offer" | "webrtc_offer" => Some(SignalKind::Offer),
            "answer" | "webrtc_answer" => Some(SignalKind::Answer),
            "ice_candidate" | "webrtc_ice_candidate" => Some(SignalKind::IceCandidate),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice_candidate",
        }
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Ping,
    SpeakingStatus {
        is_speaking: bool,
    },
    Signal {
        kind: SignalKind,
        to: String,
        frame: Map<String, Value>,
    },
    /// Unrecognized type, forwarded verbatim to the rest of the room.
    Passthrough,
}

/// Classify an inbound text frame.
///
/// Returns `None` for malformed frames: invalid JSON, non-object payloads,
/// a missing `type`, a speaking update without a boolean flag, or a
/// signaling message without a `to` target.
#[must_use]
pub fn classify(text: &str) -> Option<InboundMessage> {
    let Ok(Value::Object(frame)) = serde_json::from_str::<Value>(text) else {
        return None;
    };
    let kind = frame.get("type")?.as_str()?;

    match kind {
        "ping" => Some(InboundMessage::Ping),
        "speaking_status" | "speaking" => {
            let is_speaking = frame
                .get("isSpeaking")
                .or_else(|| frame.get("is_speaking"))?
                .as_bool()?;
            Some(InboundMessage::SpeakingStatus { is_speaking })
        }
        other => match SignalKind::from_type(other) {
            Some(kind) => {
                let to = frame.get("to")?.as_str()?;
                if to.is_empty() {
                    return None;
                }
                Some(InboundMessage::Signal {
                    kind,
                    to: to.to_string(),
                    frame,
                })
            }
            None => Some(InboundMessage::Passthrough),
        },
    }
}

/// Stamp the authenticated sender on a signaling frame and serialize it.
///
/// Any client-supplied `from` is overwritten.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn stamp_sender(mut frame: Map<String, Value>, from: &str) -> Result<String, serde_json::Error> {
    frame.insert("from".to_string(), Value::String(from.to_string()));
    serde_json::to_string(&frame)
}
