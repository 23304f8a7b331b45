//! Room Coordinator: the public facade over the actor system.
//!
//! The coordinator does store I/O (id collision checks, hydration, listing)
//! outside any room actor and then hands the atomic step to the room's
//! actor. It is cheap to clone and shared by the HTTP layer and the
//! background tasks.

use crate::actors::{
    ActorMetrics, ConnectOutcome, ConnectionHandle, ControllerSettings, ControllerStatus,
    ExpireOutcome, JoinResult, RoomActorHandle, RoomControllerHandle, RoomSeed, RoomState,
    RoomSummary, RoomView, SpawnMode,
};
use crate::config::RoomPolicy;
use crate::errors::RcError;
use crate::observability::metrics as prom;
use crate::protocol::{ParticipantView, RequesterView};
use crate::store::{ParticipantRecord, RequestStatus, RoomRecord, RoomStore};
use common::types::{unix_now, Identity, RoomId};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Attempts at generating an unused room id before giving up.
const ROOM_ID_ATTEMPTS: usize = 8;

/// Default capacity for new rooms.
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 10;

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Longest accepted room name, in characters.
pub const MAX_ROOM_NAME_LEN: usize = 100;

/// Room creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSpec {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub requires_password: Option<bool>,
    #[serde(default)]
    pub has_waiting_room: Option<bool>,
}

/// A freshly created room with its auto-admitted creator.
#[derive(Debug, Clone)]
pub struct CreatedRoom {
    pub room_id: String,
    pub room: RoomView,
    pub creator: ParticipantView,
}

/// Trim and bound a display name.
///
/// # Errors
///
/// Returns `RcError::InvalidInput` if the name is empty after trimming or
/// longer than [`MAX_DISPLAY_NAME_LEN`] characters.
pub fn validate_display_name(name: &str) -> Result<String, RcError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RcError::InvalidInput("name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(RcError::InvalidInput(format!(
            "name must be at most {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Public room coordination API.
#[derive(Clone)]
pub struct RoomCoordinator {
    controller: RoomControllerHandle,
    store: Arc<dyn RoomStore>,
    policy: RoomPolicy,
    metrics: Arc<ActorMetrics>,
}

impl RoomCoordinator {
    /// Start the controller actor and return a coordinator over it.
    #[must_use]
    pub fn new(
        store: Arc<dyn RoomStore>,
        policy: RoomPolicy,
        max_rooms: usize,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let controller = RoomControllerHandle::new(
            ControllerSettings {
                store: Arc::clone(&store),
                policy,
                max_rooms,
            },
            Arc::clone(&metrics),
        );
        Self {
            controller,
            store,
            policy,
            metrics,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RoomPolicy {
        self.policy
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a room and admit its creator.
    #[instrument(skip_all, name = "rc.coordinator.create_room", fields(user_id = %creator.user_id))]
    pub async fn create_room(
        &self,
        creator: &Identity,
        spec: RoomSpec,
    ) -> Result<CreatedRoom, RcError> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(RcError::InvalidInput("room name must not be empty".to_string()));
        }
        if name.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(RcError::InvalidInput(format!(
                "room name must be at most {MAX_ROOM_NAME_LEN} characters"
            )));
        }
        let max_participants = spec.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS);
        if max_participants < 1 || max_participants > self.policy.max_room_capacity {
            return Err(RcError::InvalidInput(format!(
                "maxParticipants must be between 1 and {}",
                self.policy.max_room_capacity
            )));
        }
        let password = spec.password.filter(|p| !p.is_empty());
        let requires_password = spec.requires_password.unwrap_or(password.is_some());
        if requires_password && password.is_none() {
            return Err(RcError::InvalidInput(
                "a password is required when requiresPassword is set".to_string(),
            ));
        }
        let creator_name = validate_display_name(&creator.display_name)?;

        let room_id = self.allocate_room_id().await?;
        let now = unix_now();
        let room = RoomRecord {
            id: room_id.clone(),
            name: name.to_string(),
            password,
            creator_id: creator.user_id.clone(),
            creator_name: creator_name.clone(),
            max_participants,
            requires_password,
            has_waiting_room: spec.has_waiting_room.unwrap_or(true),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let creator_record = ParticipantRecord {
            id: creator.user_id.clone(),
            name: creator_name,
            is_creator: true,
            is_muted: false,
            is_speaking: false,
            joined_at: now,
        };

        let view = RoomView::from(&room);
        let mut seed = RoomSeed::new(room);
        seed.participants.push(creator_record.clone());
        self.controller.spawn_room(seed, SpawnMode::Create).await?;

        info!(
            target: "rc.coordinator",
            room_id = %room_id,
            max_participants,
            has_waiting_room = view.has_waiting_room,
            "Room created"
        );

        Ok(CreatedRoom {
            room_id,
            room: view,
            creator: ParticipantView::from_record(&creator_record, false),
        })
    }

    async fn allocate_room_id(&self) -> Result<String, RcError> {
        for _ in 0..ROOM_ID_ATTEMPTS {
            let candidate = RoomId::generate().into_inner();
            if self.controller.get_room(candidate.clone()).await?.is_some() {
                continue;
            }
            if self.store.get_room(&candidate).await?.is_some() {
                continue;
            }
            return Ok(candidate);
        }
        warn!(target: "rc.coordinator", "Exhausted room id attempts");
        Err(RcError::Internal("could not allocate a room id".to_string()))
    }

    /// Join a room. See [`JoinResult`] for the outcomes.
    pub async fn join_room(
        &self,
        room_id: &str,
        identity: &Identity,
        display_name: Option<&str>,
        password: Option<String>,
    ) -> Result<JoinResult, RcError> {
        let room = self.room(room_id).await?;
        let name = match display_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => validate_display_name(name)?,
            None => validate_display_name(&identity.display_name)?,
        };
        room.join(identity.clone(), name, password).await
    }

    /// Approve a pending join request.
    pub async fn approve(
        &self,
        room_id: &str,
        approver: &Identity,
        target_id: &str,
    ) -> Result<ParticipantView, RcError> {
        let room = self.room(room_id).await?;
        room.approve(approver.user_id.clone(), target_id.to_string())
            .await
    }

    /// Reject a pending join request.
    pub async fn reject(
        &self,
        room_id: &str,
        approver: &Identity,
        target_id: &str,
    ) -> Result<(), RcError> {
        let room = self.room(room_id).await?;
        room.reject(approver.user_id.clone(), target_id.to_string())
            .await
    }

    /// Leave a room.
    pub async fn leave(&self, room_id: &str, participant_id: &str) -> Result<(), RcError> {
        let room = self.room(room_id).await?;
        room.leave(participant_id.to_string()).await
    }

    /// Delete a room (creator only).
    pub async fn delete_room(&self, room_id: &str, caller: &Identity) -> Result<(), RcError> {
        let room = self.room(room_id).await?;
        room.delete(caller.user_id.clone()).await?;
        self.retire(&room).await;
        info!(target: "rc.coordinator", room_id = %room_id, "Room deleted");
        Ok(())
    }

    /// Expire rooms idle since before `now - inactivity_ttl`.
    ///
    /// Returns the ids of expired rooms. Per-room failures are logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller or the store listing fails.
    #[instrument(skip_all, name = "rc.coordinator.expire_rooms")]
    pub async fn expire_rooms(&self, now: i64) -> Result<Vec<String>, RcError> {
        let window = i64::try_from(self.policy.inactivity_ttl.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(window);
        let mut expired = Vec::new();

        let live = self.controller.list_rooms().await?;
        let live_ids: HashSet<String> = live.iter().map(|h| h.room_id().to_string()).collect();
        for room in live {
            match room.expire_if_idle(cutoff).await {
                Ok(ExpireOutcome::Expired) => {
                    self.retire(&room).await;
                    expired.push(room.room_id().to_string());
                }
                Ok(ExpireOutcome::Refreshed) => {
                    debug!(
                        target: "rc.coordinator",
                        room_id = %room.room_id(),
                        "Idle room kept alive by live connections"
                    );
                }
                Ok(ExpireOutcome::Retained) => {}
                Err(e) => {
                    warn!(
                        target: "rc.coordinator",
                        room_id = %room.room_id(),
                        error = %e,
                        "Failed to check room expiry"
                    );
                }
            }
        }

        // Rooms known only to the store
        for record in self.store.list_rooms().await? {
            if live_ids.contains(&record.id) || record.updated_at >= cutoff {
                continue;
            }
            match self.store.delete_room(&record.id).await {
                Ok(()) => expired.push(record.id),
                Err(e) => {
                    warn!(
                        target: "rc.coordinator",
                        room_id = %record.id,
                        error = %e,
                        "Failed to delete expired room from store"
                    );
                }
            }
        }

        if !expired.is_empty() {
            prom::record_rooms_expired(expired.len());
            info!(
                target: "rc.coordinator",
                count = expired.len(),
                "Expired idle rooms"
            );
        }
        Ok(expired)
    }

    /// Flush a torn-down room's writes and drop its actor.
    async fn retire(&self, room: &RoomActorHandle) {
        // Flush first so a concurrent hydration cannot read the stale record
        if let Err(e) = room.flush().await {
            debug!(target: "rc.coordinator", room_id = %room.room_id(), error = %e, "Flush failed");
        }
        if let Err(e) = self.controller.remove_room(room.room_id().to_string()).await {
            warn!(
                target: "rc.coordinator",
                room_id = %room.room_id(),
                error = %e,
                "Failed to remove room actor"
            );
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn room_state(&self, room_id: &str) -> Result<RoomState, RcError> {
        self.room(room_id).await?.get_state().await
    }

    /// Summaries of every room, newest first.
    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, RcError> {
        let mut summaries = Vec::new();
        let mut seen = HashSet::new();

        for room in self.controller.list_rooms().await? {
            // Rooms torn down since listing answer NotFound
            if let Ok(state) = room.get_state().await {
                seen.insert(state.room.id.clone());
                summaries.push(RoomSummary::from(&state));
            }
        }
        for record in self.store.list_rooms().await? {
            if seen.contains(&record.id) {
                continue;
            }
            let participants = self.store.get_participants(&record.id).await?;
            let pending = self.store.get_pending_requests(&record.id).await?;
            summaries.push(RoomSummary {
                room: RoomView::from(&record),
                participants_count: participants.len(),
                pending_requests_count: pending.len(),
                active_connections_count: 0,
            });
        }

        summaries.sort_by(|a, b| {
            b.room
                .created_at
                .cmp(&a.room.created_at)
                .then_with(|| a.room.id.cmp(&b.room.id))
        });
        Ok(summaries)
    }

    /// Pending join requests (creator only).
    pub async fn pending_requests(
        &self,
        room_id: &str,
        caller: &Identity,
    ) -> Result<Vec<RequesterView>, RcError> {
        let room = self.room(room_id).await?;
        room.pending_requests(caller.user_id.clone()).await
    }

    /// Status of a join request, `Approved` once the caller is a member.
    pub async fn request_status(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<RequestStatus, RcError> {
        let room = self.room(room_id).await?;
        room.request_status(participant_id.to_string())
            .await?
            .ok_or_else(|| RcError::NotFound("join request not found".to_string()))
    }

    /// Rooms the user is a member of.
    pub async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomSummary>, RcError> {
        let mut candidates: Vec<String> = self
            .controller
            .list_rooms()
            .await?
            .iter()
            .map(|h| h.room_id().to_string())
            .collect();
        for room_id in self.store.get_user_rooms(user_id).await? {
            if !candidates.contains(&room_id) {
                candidates.push(room_id);
            }
        }

        let mut rooms = Vec::new();
        for room_id in candidates {
            let Ok(state) = self.room_state(&room_id).await else {
                continue;
            };
            if state.participants.iter().any(|p| p.id == user_id) {
                rooms.push(RoomSummary::from(&state));
            }
        }
        rooms.sort_by(|a, b| b.room.created_at.cmp(&a.room.created_at));
        Ok(rooms)
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Register a connection with its room.
    ///
    /// Returns the room handle the relay should use and the registration
    /// outcome. Any superseded connection is the caller's to close.
    pub async fn connect(
        &self,
        room_id: &str,
        connection: ConnectionHandle,
    ) -> Result<(RoomActorHandle, ConnectOutcome), RcError> {
        let room = self.room(room_id).await?;
        let outcome = room.connect(connection).await?;
        Ok((room, outcome))
    }

    /// Probe every live connection and evict idle ones.
    ///
    /// Returns the number of evicted connections.
    pub async fn sweep_idle_connections(&self, idle_timeout: Duration) -> Result<usize, RcError> {
        let mut evicted = 0;
        for room in self.controller.list_rooms().await? {
            match room.sweep_idle(idle_timeout).await {
                Ok(count) => evicted += count,
                Err(e) => {
                    debug!(
                        target: "rc.coordinator",
                        room_id = %room.room_id(),
                        error = %e,
                        "Idle sweep skipped room"
                    );
                }
            }
        }
        Ok(evicted)
    }

    // ------------------------------------------------------------------
    // Process lifecycle
    // ------------------------------------------------------------------

    pub async fn status(&self) -> Result<ControllerStatus, RcError> {
        self.controller.get_status().await
    }

    /// Stop every room actor, waiting at most `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RcError> {
        self.controller.shutdown(deadline).await
    }

    /// Resolve a room actor, hydrating it from the store if needed.
    async fn room(&self, room_id: &str) -> Result<RoomActorHandle, RcError> {
        if let Some(handle) = self.controller.get_room(room_id.to_string()).await? {
            return Ok(handle);
        }

        let Some(record) = self.store.get_room(room_id).await? else {
            return Err(RcError::NotFound("room not found".to_string()));
        };
        let participants = self.store.get_participants(room_id).await?;
        let requests = self.store.get_requests(room_id).await?;
        debug!(
            target: "rc.coordinator",
            room_id = %room_id,
            participants = participants.len(),
            requests = requests.len(),
            "Hydrating room from store"
        );
        self.controller
            .spawn_room(
                RoomSeed::hydrated(record, participants, requests),
                SpawnMode::Adopt,
            )
            .await
    }
}
