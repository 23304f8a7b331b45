//! Room Store: durable-ish representation of rooms, participants, and join
//! requests.
//!
//! The in-process room actors are the correctness boundary; the store only
//! needs last-write-wins semantics. Two backends are provided:
//!
//! - [`MemoryRoomStore`] for single-process deployments and tests
//! - [`RedisRoomStore`] for a shared cache with key expiry
//!
//! Room actors never await the store directly. They hand [`StoreOp`]s to a
//! per-room [`StoreWriter`] that applies them in order.

mod memory;
mod redis_store;
mod writer;

pub use memory::MemoryRoomStore;
pub use redis_store::RedisRoomStore;
pub use writer::{StoreOp, StoreWriter};

use crate::errors::RcError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Persisted room metadata.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub creator_id: String,
    pub creator_name: String,
    pub max_participants: u32,
    pub requires_password: bool,
    pub has_waiting_room: bool,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RoomRecord {
    /// Check a supplied password against the room.
    ///
    /// Rooms that do not require a password, or whose stored password is
    /// empty, accept any input.
    #[must_use]
    pub fn password_matches(&self, supplied: Option<&str>) -> bool {
        if !self.requires_password {
            return true;
        }
        match self.password.as_deref() {
            None | Some("") => true,
            Some(stored) => supplied == Some(stored),
        }
    }
}

/// Custom Debug implementation that redacts the room password.
impl fmt::Debug for RoomRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("creator_id", &self.creator_id)
            .field("max_participants", &self.max_participants)
            .field("requires_password", &self.requires_password)
            .field("has_waiting_room", &self.has_waiting_room)
            .field("is_active", &self.is_active)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

/// Persisted room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: String,
    pub name: String,
    pub is_creator: bool,
    pub is_muted: bool,
    pub is_speaking: bool,
    pub joined_at: i64,
}

/// Join request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Persisted join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestRecord {
    pub participant_id: String,
    pub display_name: String,
    pub requested_at: i64,
    pub status: RequestStatus,
    #[serde(default)]
    pub decided_at: Option<i64>,
}

/// Key/value operations the coordinator needs from a backing store.
///
/// Participant and request operations have hash-field semantics keyed by
/// participant id within a room.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Fetch a room, or `None` if absent or expired.
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>, RcError>;

    /// Write a room, refreshing its TTL and that of its companion data.
    async fn put_room(&self, room: &RoomRecord, ttl: Duration) -> Result<(), RcError>;

    /// Delete a room with its participants and requests.
    async fn delete_room(&self, room_id: &str) -> Result<(), RcError>;

    /// List all unexpired rooms.
    async fn list_rooms(&self) -> Result<Vec<RoomRecord>, RcError>;

    /// Participants of a room, ordered by join time.
    async fn get_participants(&self, room_id: &str) -> Result<Vec<ParticipantRecord>, RcError>;

    async fn put_participant(
        &self,
        room_id: &str,
        participant: &ParticipantRecord,
    ) -> Result<(), RcError>;

    async fn delete_participant(&self, room_id: &str, participant_id: &str)
        -> Result<(), RcError>;

    /// All join requests of a room (pending and recently rejected).
    async fn get_requests(&self, room_id: &str) -> Result<Vec<JoinRequestRecord>, RcError>;

    async fn put_request(&self, room_id: &str, request: &JoinRequestRecord)
        -> Result<(), RcError>;

    async fn delete_request(&self, room_id: &str, participant_id: &str) -> Result<(), RcError>;

    /// Room ids a user currently belongs to.
    async fn get_user_rooms(&self, user_id: &str) -> Result<Vec<String>, RcError>;

    /// Pending join requests of a room.
    async fn get_pending_requests(
        &self,
        room_id: &str,
    ) -> Result<Vec<JoinRequestRecord>, RcError> {
        Ok(self
            .get_requests(room_id)
            .await?
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect())
    }
}

/// Order participants by admission.
pub(crate) fn sort_participants(participants: &mut [ParticipantRecord]) {
    participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
}
