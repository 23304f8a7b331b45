//! Message and result types for the actor system.
//!
//! Request/response messages carry a `oneshot` sender for the reply.

use super::connection::ConnectionHandle;
use super::hub::Lane;
use super::room::{RoomActorHandle, RoomSeed};
use crate::errors::RcError;
use crate::protocol::{ParticipantView, RequesterView};
use crate::store::{RequestStatus, RoomRecord};
use common::types::Identity;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// Controller Messages
// ============================================================================

/// How a room actor is being brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Brand new room; an existing id is a collision.
    Create,
    /// Room loaded from the store; an existing actor wins.
    Adopt,
}

/// Messages handled by `RoomControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    SpawnRoom {
        seed: RoomSeed,
        mode: SpawnMode,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },
    GetRoom {
        room_id: String,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },
    RemoveRoom {
        room_id: String,
        respond_to: oneshot::Sender<bool>,
    },
    ListRooms {
        respond_to: oneshot::Sender<Vec<RoomActorHandle>>,
    },
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<()>,
    },
}

/// Controller status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

// ============================================================================
// Room Messages
// ============================================================================

/// Messages handled by `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        identity: Identity,
        display_name: String,
        password: Option<String>,
        respond_to: oneshot::Sender<Result<JoinResult, RcError>>,
    },
    Approve {
        approver_id: String,
        target_id: String,
        respond_to: oneshot::Sender<Result<ParticipantView, RcError>>,
    },
    Reject {
        approver_id: String,
        target_id: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
    Leave {
        participant_id: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
    Delete {
        caller_id: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
    Expire {
        cutoff: i64,
        respond_to: oneshot::Sender<ExpireOutcome>,
    },
    Connect {
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<Result<ConnectOutcome, RcError>>,
    },
    Disconnect {
        participant_id: String,
        connection_id: String,
        respond_to: oneshot::Sender<bool>,
    },
    Speaking {
        participant_id: String,
        connection_id: String,
        is_speaking: bool,
    },
    Signal {
        from: String,
        connection_id: String,
        to: String,
        frame: String,
        respond_to: oneshot::Sender<bool>,
    },
    Passthrough {
        from: String,
        connection_id: String,
        frame: Arc<str>,
    },
    SweepIdle {
        idle_timeout: Duration,
        respond_to: oneshot::Sender<usize>,
    },
    GetState {
        respond_to: oneshot::Sender<Result<RoomState, RcError>>,
    },
    PendingRequests {
        caller_id: String,
        respond_to: oneshot::Sender<Result<Vec<RequesterView>, RcError>>,
    },
    RequestStatus {
        participant_id: String,
        respond_to: oneshot::Sender<Option<RequestStatus>>,
    },
    Flush {
        respond_to: oneshot::Sender<()>,
    },
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of a join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinResult {
    Admitted(ParticipantView),
    AlreadyMember(ParticipantView),
    Queued(RequesterView),
    Rejected(JoinRejection),
}

impl JoinResult {
    /// Bounded label for metrics and HTTP status.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            JoinResult::Admitted(_) => "admitted",
            JoinResult::AlreadyMember(_) => "already_member",
            JoinResult::Queued(_) => "queued",
            JoinResult::Rejected(JoinRejection::RoomFull) => "room_full",
        }
    }

    /// True when the caller is a member after the call.
    #[must_use]
    pub fn is_member(&self) -> bool {
        matches!(self, JoinResult::Admitted(_) | JoinResult::AlreadyMember(_))
    }

    #[must_use]
    pub fn participant(&self) -> Option<&ParticipantView> {
        match self {
            JoinResult::Admitted(p) | JoinResult::AlreadyMember(p) => Some(p),
            JoinResult::Queued(_) | JoinResult::Rejected(_) => None,
        }
    }
}

/// Expected-condition rejection of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    RoomFull,
}

impl JoinRejection {
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            JoinRejection::RoomFull => "room full",
        }
    }

    /// Error used when the rejection crosses the HTTP boundary.
    #[must_use]
    pub fn into_error(self) -> RcError {
        RcError::Conflict(self.reason().to_string())
    }
}

/// Result of registering a connection.
#[derive(Debug)]
pub struct ConnectOutcome {
    pub lane: Lane,
    /// Previous connection for the same participant, to be closed by the
    /// caller.
    pub superseded: Option<ConnectionHandle>,
}

/// Result of an expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// Room was idle and has been torn down.
    Expired,
    /// Room is recent enough.
    Retained,
    /// Room was idle by timestamp but still has live connections; its
    /// activity timestamp was refreshed.
    Refreshed,
}

/// Room metadata safe to show clients (no password).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: String,
    pub name: String,
    pub creator_id: String,
    pub creator_name: String,
    pub max_participants: u32,
    pub requires_password: bool,
    pub has_waiting_room: bool,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&RoomRecord> for RoomView {
    fn from(room: &RoomRecord) -> Self {
        Self {
            id: room.id.clone(),
            name: room.name.clone(),
            creator_id: room.creator_id.clone(),
            creator_name: room.creator_name.clone(),
            max_participants: room.max_participants,
            requires_password: room.requires_password,
            has_waiting_room: room.has_waiting_room,
            is_active: room.is_active,
            created_at: room.created_at,
            updated_at: room.updated_at,
        }
    }
}

/// Full room snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub room: RoomView,
    pub participants: Vec<ParticipantView>,
    pub pending_requests: Vec<RequesterView>,
    pub active_connections: usize,
    pub waiting_connections: usize,
}

/// Room read for unauthenticated callers. Requesters stay creator-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetails {
    pub room: RoomView,
    pub participants: Vec<ParticipantView>,
    pub pending_requests_count: usize,
    pub active_connections: usize,
    pub waiting_connections: usize,
}

impl From<RoomState> for RoomDetails {
    fn from(state: RoomState) -> Self {
        Self {
            room: state.room,
            participants: state.participants,
            pending_requests_count: state.pending_requests.len(),
            active_connections: state.active_connections,
            waiting_connections: state.waiting_connections,
        }
    }
}

/// Room listing entry with counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: RoomView,
    pub participants_count: usize,
    pub pending_requests_count: usize,
    pub active_connections_count: usize,
}

impl From<&RoomState> for RoomSummary {
    fn from(state: &RoomState) -> Self {
        Self {
            room: state.room.clone(),
            participants_count: state.participants.len(),
            pending_requests_count: state.pending_requests.len(),
            active_connections_count: state.active_connections,
        }
    }
}
