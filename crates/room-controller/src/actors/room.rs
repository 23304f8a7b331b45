//! `RoomActor` - per-room actor that owns all mutable state for one room.
//!
//! Each `RoomActor`:
//! - Owns the room record, the ordered participant list and join requests
//! - Owns the room's `ConnectionHub`, so fan-out runs inside the same
//!   critical section as the state change that caused it
//! - Queues persistence on a `StoreWriter` without awaiting the store
//!
//! # Ordering
//!
//! Messages are processed one at a time. Two callers racing for the last
//! slot are serialized by the mailbox, and every recipient observes events
//! in the order the actor emitted them.
//!
//! # Disconnects
//!
//! Losing a connection never removes membership. Only an explicit leave,
//! room deletion or expiry does.

use super::connection::{ConnectionHandle, Outbound};
use super::hub::{event_frame, ConnectionHub, Lane};
use super::messages::{
    ConnectOutcome, ExpireOutcome, JoinRejection, JoinResult, RoomMessage, RoomState, RoomView,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::config::RoomPolicy;
use crate::errors::RcError;
use crate::observability::metrics as prom;
use crate::protocol::{CloseCode, ParticipantView, RequesterView, ServerEvent};
use crate::store::{
    JoinRequestRecord, ParticipantRecord, RequestStatus, RoomRecord, RoomStore, StoreOp,
    StoreWriter,
};
use common::types::{unix_now, Identity};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How often rejected join requests are checked for pruning.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

/// Initial state for a room actor.
#[derive(Debug, Clone)]
pub struct RoomSeed {
    pub room: RoomRecord,
    pub participants: Vec<ParticipantRecord>,
    pub requests: Vec<JoinRequestRecord>,
    /// Write the seed to the store on startup (new rooms).
    pub persist: bool,
}

impl RoomSeed {
    /// Seed for a brand new room.
    #[must_use]
    pub fn new(room: RoomRecord) -> Self {
        Self {
            room,
            participants: Vec::new(),
            requests: Vec::new(),
            persist: true,
        }
    }

    /// Seed rebuilt from stored records.
    #[must_use]
    pub fn hydrated(
        room: RoomRecord,
        participants: Vec<ParticipantRecord>,
        requests: Vec<JoinRequestRecord>,
    ) -> Self {
        Self {
            room,
            participants,
            requests,
            persist: false,
        }
    }
}

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
    mailbox: Arc<MailboxMonitor>,
}

impl std::fmt::Debug for RoomActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomActorHandle")
            .field("room_id", &self.room_id)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Current mailbox depth.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), RcError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_dequeue();
            RcError::Internal(format!("channel send failed: {e}"))
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Admit, queue, or reject a caller.
    pub async fn join(
        &self,
        identity: Identity,
        display_name: String,
        password: Option<String>,
    ) -> Result<JoinResult, RcError> {
        self.request(|respond_to| RoomMessage::Join {
            identity,
            display_name,
            password,
            respond_to,
        })
        .await?
    }

    /// Approve a pending join request (creator only).
    pub async fn approve(
        &self,
        approver_id: String,
        target_id: String,
    ) -> Result<ParticipantView, RcError> {
        self.request(|respond_to| RoomMessage::Approve {
            approver_id,
            target_id,
            respond_to,
        })
        .await?
    }

    /// Reject a pending join request (creator only).
    pub async fn reject(&self, approver_id: String, target_id: String) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Reject {
            approver_id,
            target_id,
            respond_to,
        })
        .await?
    }

    /// Explicit leave.
    pub async fn leave(&self, participant_id: String) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Leave {
            participant_id,
            respond_to,
        })
        .await?
    }

    /// Delete the room (creator only).
    pub async fn delete(&self, caller_id: String) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Delete {
            caller_id,
            respond_to,
        })
        .await?
    }

    /// Expire the room if its last activity is older than `cutoff`.
    pub async fn expire_if_idle(&self, cutoff: i64) -> Result<ExpireOutcome, RcError> {
        self.request(|respond_to| RoomMessage::Expire { cutoff, respond_to })
            .await
    }

    /// Register a live connection.
    pub async fn connect(&self, connection: ConnectionHandle) -> Result<ConnectOutcome, RcError> {
        self.request(|respond_to| RoomMessage::Connect {
            connection,
            respond_to,
        })
        .await?
    }

    /// Unregister a connection. Returns `true` if a `user_left` was sent.
    pub async fn disconnect(
        &self,
        participant_id: String,
        connection_id: String,
    ) -> Result<bool, RcError> {
        self.request(|respond_to| RoomMessage::Disconnect {
            participant_id,
            connection_id,
            respond_to,
        })
        .await
    }

    /// Update speaking status (fire-and-forget).
    pub async fn speaking(
        &self,
        participant_id: String,
        connection_id: String,
        is_speaking: bool,
    ) -> Result<(), RcError> {
        self.send(RoomMessage::Speaking {
            participant_id,
            connection_id,
            is_speaking,
        })
        .await
    }

    /// Relay a stamped signal frame. Returns `true` if delivered.
    pub async fn relay_signal(
        &self,
        from: String,
        connection_id: String,
        to: String,
        frame: String,
    ) -> Result<bool, RcError> {
        self.request(|respond_to| RoomMessage::Signal {
            from,
            connection_id,
            to,
            frame,
            respond_to,
        })
        .await
    }

    /// Forward a frame verbatim to every other member (fire-and-forget).
    pub async fn passthrough(
        &self,
        from: String,
        connection_id: String,
        frame: Arc<str>,
    ) -> Result<(), RcError> {
        self.send(RoomMessage::Passthrough {
            from,
            connection_id,
            frame,
        })
        .await
    }

    /// Probe live connections and evict idle ones. Returns evictions.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> Result<usize, RcError> {
        self.request(|respond_to| RoomMessage::SweepIdle {
            idle_timeout,
            respond_to,
        })
        .await
    }

    /// Get current room state.
    pub async fn get_state(&self) -> Result<RoomState, RcError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await?
    }

    /// Pending join requests (creator only).
    pub async fn pending_requests(&self, caller_id: String) -> Result<Vec<RequesterView>, RcError> {
        self.request(|respond_to| RoomMessage::PendingRequests {
            caller_id,
            respond_to,
        })
        .await?
    }

    /// Status of a caller's join request, `Approved` once a member.
    pub async fn request_status(
        &self,
        participant_id: String,
    ) -> Result<Option<RequestStatus>, RcError> {
        self.request(|respond_to| RoomMessage::RequestStatus {
            participant_id,
            respond_to,
        })
        .await
    }

    /// Wait until every state change so far has been handed to the store.
    pub async fn flush(&self) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Flush { respond_to })
            .await
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The room actor implementation.
pub struct RoomActor {
    room: RoomRecord,
    /// Ordered by join time.
    participants: Vec<ParticipantRecord>,
    requests: HashMap<String, JoinRequestRecord>,
    /// When each rejected request was decided, for pruning.
    rejected_at: HashMap<String, Instant>,
    hub: ConnectionHub,
    store: StoreWriter,
    policy: RoomPolicy,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    /// Set once the room is deleted or expired; the actor then only
    /// answers `NotFound` until its controller cancels it.
    deleted: bool,
}

impl RoomActor {
    /// Spawn a new room actor.
    pub fn spawn(
        seed: RoomSeed,
        store: Arc<dyn RoomStore>,
        policy: RoomPolicy,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let room_id = seed.room.id.clone();
        let (writer, _writer_task) =
            StoreWriter::spawn(store, room_id.clone(), policy.inactivity_ttl);
        let mailbox = MailboxMonitor::new(ActorType::Room, &room_id);

        let now = Instant::now();
        let rejected_at = seed
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Rejected)
            .map(|r| (r.participant_id.clone(), now))
            .collect();

        if seed.persist {
            writer.submit(StoreOp::PutRoom(seed.room.clone()));
            for participant in &seed.participants {
                writer.submit(StoreOp::PutParticipant(participant.clone()));
            }
            for request in &seed.requests {
                writer.submit(StoreOp::PutRequest(request.clone()));
            }
        }

        let mut participants = seed.participants;
        crate::store::sort_participants(&mut participants);

        let actor = Self {
            hub: ConnectionHub::new(room_id.clone(), metrics),
            room: seed.room,
            participants,
            requests: seed
                .requests
                .into_iter()
                .map(|r| (r.participant_id.clone(), r))
                .collect(),
            rejected_at,
            store: writer,
            policy,
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            deleted: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room.id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room.id,
            participants = self.participants.len(),
            "RoomActor started"
        );

        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.room",
                        room_id = %self.room.id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                _ = housekeeping.tick() => {
                    self.prune_rejected_requests();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "rc.actor.room",
                                room_id = %self.room.id,
                                "RoomActor channel closed, exiting"
                            );
                            self.graceful_shutdown();
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room.id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                identity,
                display_name,
                password,
                respond_to,
            } => {
                let result = self.handle_join(identity, display_name, password);
                let _ = respond_to.send(result);
            }
            RoomMessage::Approve {
                approver_id,
                target_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_approve(&approver_id, &target_id));
            }
            RoomMessage::Reject {
                approver_id,
                target_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_reject(&approver_id, &target_id));
            }
            RoomMessage::Leave {
                participant_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_leave(&participant_id));
            }
            RoomMessage::Delete {
                caller_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_delete(&caller_id));
            }
            RoomMessage::Expire { cutoff, respond_to } => {
                let _ = respond_to.send(self.handle_expire(cutoff));
            }
            RoomMessage::Connect {
                connection,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_connect(connection));
            }
            RoomMessage::Disconnect {
                participant_id,
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_disconnect(&participant_id, &connection_id));
            }
            RoomMessage::Speaking {
                participant_id,
                connection_id,
                is_speaking,
            } => {
                self.handle_speaking(&participant_id, &connection_id, is_speaking);
            }
            RoomMessage::Signal {
                from,
                connection_id,
                to,
                frame,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_signal(&from, &connection_id, &to, frame));
            }
            RoomMessage::Passthrough {
                from,
                connection_id,
                frame,
            } => {
                if self.hub.is_member_connection(&from, &connection_id) {
                    let evicted = self.hub.broadcast_except(&from, &Outbound::Text(frame));
                    self.handle_evicted(evicted);
                }
            }
            RoomMessage::SweepIdle {
                idle_timeout,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_sweep_idle(idle_timeout));
            }
            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
            RoomMessage::PendingRequests {
                caller_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.pending_requests(&caller_id));
            }
            RoomMessage::RequestStatus {
                participant_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.request_status(&participant_id));
            }
            RoomMessage::Flush { respond_to } => {
                // Resolve once the writer has applied everything queued so far
                let store = self.store.clone();
                tokio::spawn(async move {
                    store.flush().await;
                    let _ = respond_to.send(());
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(room_id = %self.room.id, user_id = %identity.user_id))]
    fn handle_join(
        &mut self,
        identity: Identity,
        display_name: String,
        password: Option<String>,
    ) -> Result<JoinResult, RcError> {
        self.ensure_live()?;

        if !self.room.password_matches(password.as_deref()) {
            prom::record_join_outcome("unauthorized");
            return Err(RcError::Unauthorized("invalid room password".to_string()));
        }

        if let Some(view) = self.view_of(&identity.user_id) {
            prom::record_join_outcome("already_member");
            return Ok(JoinResult::AlreadyMember(view));
        }

        let is_creator = identity.user_id == self.room.creator_id;
        let result = if !is_creator && self.room.has_waiting_room {
            JoinResult::Queued(self.enqueue_request(identity.user_id, display_name))
        } else if self.is_full() {
            JoinResult::Rejected(JoinRejection::RoomFull)
        } else {
            JoinResult::Admitted(self.admit(identity.user_id, display_name, is_creator))
        };

        prom::record_join_outcome(result.outcome());
        debug!(
            target: "rc.actor.room",
            room_id = %self.room.id,
            outcome = result.outcome(),
            participants = self.participants.len(),
            "Join processed"
        );
        Ok(result)
    }

    fn admit(&mut self, participant_id: String, name: String, is_creator: bool) -> ParticipantView {
        let record = ParticipantRecord {
            id: participant_id,
            name,
            is_creator,
            is_muted: false,
            is_speaking: false,
            joined_at: unix_now(),
        };
        if self.requests.remove(&record.id).is_some() {
            self.rejected_at.remove(&record.id);
            self.store.submit(StoreOp::DeleteRequest(record.id.clone()));
        }
        self.store.submit(StoreOp::PutParticipant(record.clone()));
        let view = ParticipantView::from_record(&record, self.hub.is_connected(&record.id));
        self.participants.push(record);
        self.room.is_active = true;
        self.touch();
        view
    }

    fn enqueue_request(&mut self, participant_id: String, display_name: String) -> RequesterView {
        let request = JoinRequestRecord {
            participant_id,
            display_name,
            requested_at: unix_now(),
            status: RequestStatus::Pending,
            decided_at: None,
        };
        let view = RequesterView::from(&request);
        self.rejected_at.remove(&request.participant_id);
        self.store.submit(StoreOp::PutRequest(request.clone()));
        self.requests.insert(request.participant_id.clone(), request);
        self.touch();

        // Only the creator hears about new requests
        if let Some(frame) = event_frame(&ServerEvent::JoinRequest { user: view.clone() }) {
            let creator_id = self.room.creator_id.clone();
            if self.hub.unicast(&creator_id, frame) == super::hub::Delivery::Evicted {
                self.handle_evicted(vec![creator_id]);
            }
        }
        view
    }

    #[instrument(skip_all, fields(room_id = %self.room.id, target_id = %target_id))]
    fn handle_approve(
        &mut self,
        approver_id: &str,
        target_id: &str,
    ) -> Result<ParticipantView, RcError> {
        self.ensure_live()?;
        self.ensure_creator(approver_id)?;

        let Some(request) = self
            .requests
            .get(target_id)
            .filter(|r| r.status == RequestStatus::Pending)
        else {
            return Err(RcError::NotFound("no pending join request".to_string()));
        };
        if self.is_full() {
            return Err(JoinRejection::RoomFull.into_error());
        }
        let display_name = request.display_name.clone();

        let promoted = self.hub.promote(target_id);
        let view = self.admit(target_id.to_string(), display_name, false);

        self.broadcast(&ServerEvent::JoinApproved { user: view.clone() });
        if promoted {
            self.send_snapshot(target_id);
        }
        self.broadcast(&ServerEvent::UserJoined { user: view.clone() });

        info!(
            target: "rc.actor.room",
            room_id = %self.room.id,
            participant_id = %target_id,
            promoted,
            "Join request approved"
        );
        Ok(view)
    }

    #[instrument(skip_all, fields(room_id = %self.room.id, target_id = %target_id))]
    fn handle_reject(&mut self, approver_id: &str, target_id: &str) -> Result<(), RcError> {
        self.ensure_live()?;
        self.ensure_creator(approver_id)?;

        let Some(request) = self.requests.get_mut(target_id) else {
            return Err(RcError::NotFound("no join request".to_string()));
        };
        match request.status {
            RequestStatus::Rejected => return Ok(()),
            RequestStatus::Approved => {
                return Err(RcError::Conflict("join request already approved".to_string()))
            }
            RequestStatus::Pending => {}
        }
        request.status = RequestStatus::Rejected;
        request.decided_at = Some(unix_now());
        self.store.submit(StoreOp::PutRequest(request.clone()));
        self.rejected_at.insert(target_id.to_string(), Instant::now());
        self.touch();

        if let Some(frame) = event_frame(&ServerEvent::JoinRejected {
            participant_id: target_id.to_string(),
        }) {
            self.hub.notify_waiting(target_id, frame);
        }
        if let Some(connection) = self.hub.remove_waiting(target_id) {
            connection.close(CloseCode::JoinRejected);
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room.id,
            participant_id = %target_id,
            "Join request rejected"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(room_id = %self.room.id, participant_id = %participant_id))]
    fn handle_leave(&mut self, participant_id: &str) -> Result<(), RcError> {
        self.ensure_live()?;
        let Some(index) = self.participants.iter().position(|p| p.id == participant_id) else {
            return Err(RcError::NotAMember);
        };
        self.participants.remove(index);
        self.store
            .submit(StoreOp::DeleteParticipant(participant_id.to_string()));

        if let Some(connection) = self.hub.remove(participant_id) {
            connection.close(CloseCode::Normal);
        }
        self.broadcast(&ServerEvent::UserLeft {
            participant_id: participant_id.to_string(),
        });

        if self.participants.is_empty() {
            self.room.is_active = false;
        }
        self.touch();

        info!(
            target: "rc.actor.room",
            room_id = %self.room.id,
            participant_id = %participant_id,
            remaining = self.participants.len(),
            "Participant left"
        );
        Ok(())
    }

    fn handle_delete(&mut self, caller_id: &str) -> Result<(), RcError> {
        self.ensure_live()?;
        self.ensure_creator(caller_id)?;
        self.teardown("deleted");
        Ok(())
    }

    fn handle_expire(&mut self, cutoff: i64) -> ExpireOutcome {
        if self.deleted {
            return ExpireOutcome::Expired;
        }
        if self.room.updated_at >= cutoff {
            return ExpireOutcome::Retained;
        }
        if self.hub.member_connection_count() > 0 {
            // Connected members keep the room alive
            self.touch();
            return ExpireOutcome::Refreshed;
        }
        self.teardown("expired");
        ExpireOutcome::Expired
    }

    /// Broadcast `room_deleted`, close every connection and drop the room
    /// from the store.
    fn teardown(&mut self, reason: &'static str) {
        self.broadcast(&ServerEvent::RoomDeleted {
            room_id: self.room.id.clone(),
        });
        let closed = self.hub.close_room(CloseCode::RoomDeleted);
        self.store.submit(StoreOp::DeleteRoom);
        self.participants.clear();
        self.requests.clear();
        self.rejected_at.clear();
        self.deleted = true;

        info!(
            target: "rc.actor.room",
            room_id = %self.room.id,
            reason,
            connections_closed = closed,
            "Room torn down"
        );
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(room_id = %self.room.id, participant_id = %connection.participant_id()))]
    fn handle_connect(&mut self, connection: ConnectionHandle) -> Result<ConnectOutcome, RcError> {
        if self.deleted {
            return Err(RcError::NotFound("room not found".to_string()));
        }
        let participant_id = connection.participant_id().to_string();

        if self.is_member(&participant_id) {
            let superseded = self.hub.register(connection);
            self.send_snapshot(&participant_id);
            if let Some(user) = self.view_of(&participant_id) {
                self.broadcast_except(&participant_id, &ServerEvent::UserJoined { user });
            }
            debug!(
                target: "rc.actor.room",
                room_id = %self.room.id,
                participant_id = %participant_id,
                superseded = superseded.is_some(),
                "Member connection registered"
            );
            return Ok(ConnectOutcome {
                lane: Lane::Member,
                superseded,
            });
        }

        let pending = self
            .requests
            .get(&participant_id)
            .is_some_and(|r| r.status == RequestStatus::Pending);
        if pending {
            let superseded = self.hub.register_waiting(connection);
            return Ok(ConnectOutcome {
                lane: Lane::Waiting,
                superseded,
            });
        }

        Err(RcError::NotAMember)
    }

    fn handle_disconnect(&mut self, participant_id: &str, connection_id: &str) -> bool {
        match self.hub.unregister(participant_id, connection_id) {
            Some(Lane::Member) => {
                self.departed(participant_id);
                true
            }
            Some(Lane::Waiting) | None => false,
        }
    }

    fn handle_speaking(&mut self, participant_id: &str, connection_id: &str, is_speaking: bool) {
        if !self.hub.is_member_connection(participant_id, connection_id) {
            return;
        }
        if let Some(p) = self.participants.iter_mut().find(|p| p.id == participant_id) {
            p.is_speaking = is_speaking;
        }
        self.broadcast(&ServerEvent::SpeakingStatus {
            participant_id: participant_id.to_string(),
            is_speaking,
        });
    }

    fn handle_signal(&mut self, from: &str, connection_id: &str, to: &str, frame: String) -> bool {
        if !self.hub.is_member_connection(from, connection_id) {
            return false;
        }
        match self.hub.unicast(to, Outbound::Text(Arc::from(frame))) {
            super::hub::Delivery::Delivered => true,
            super::hub::Delivery::NotConnected => {
                debug!(
                    target: "rc.actor.room",
                    room_id = %self.room.id,
                    to = %to,
                    "Signal target not connected, dropping"
                );
                false
            }
            super::hub::Delivery::Evicted => {
                self.handle_evicted(vec![to.to_string()]);
                false
            }
        }
    }

    fn handle_sweep_idle(&mut self, idle_timeout: Duration) -> usize {
        let outcome = self.hub.sweep_idle(Instant::now(), idle_timeout);
        let evicted = outcome.evicted_members.len() + outcome.evicted_waiting;
        self.handle_evicted(outcome.evicted_members);
        evicted
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn state(&self) -> Result<RoomState, RcError> {
        self.ensure_live()?;
        Ok(RoomState {
            room: RoomView::from(&self.room),
            participants: self.views(),
            pending_requests: self.pending_views(),
            active_connections: self.hub.member_connection_count(),
            waiting_connections: self.hub.waiting_connection_count(),
        })
    }

    fn pending_requests(&self, caller_id: &str) -> Result<Vec<RequesterView>, RcError> {
        self.ensure_live()?;
        self.ensure_creator(caller_id)?;
        Ok(self.pending_views())
    }

    fn request_status(&self, participant_id: &str) -> Option<RequestStatus> {
        if self.deleted {
            return None;
        }
        if self.is_member(participant_id) {
            return Some(RequestStatus::Approved);
        }
        self.requests.get(participant_id).map(|r| r.status)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_live(&self) -> Result<(), RcError> {
        if self.deleted {
            return Err(RcError::NotFound("room not found".to_string()));
        }
        Ok(())
    }

    fn ensure_creator(&self, caller_id: &str) -> Result<(), RcError> {
        if caller_id != self.room.creator_id {
            return Err(RcError::Forbidden(
                "only the room creator can do this".to_string(),
            ));
        }
        Ok(())
    }

    fn is_member(&self, participant_id: &str) -> bool {
        self.participants.iter().any(|p| p.id == participant_id)
    }

    fn is_full(&self) -> bool {
        self.participants.len() >= self.room.max_participants as usize
    }

    fn view_of(&self, participant_id: &str) -> Option<ParticipantView> {
        self.participants
            .iter()
            .find(|p| p.id == participant_id)
            .map(|p| ParticipantView::from_record(p, self.hub.is_connected(&p.id)))
    }

    fn views(&self) -> Vec<ParticipantView> {
        self.participants
            .iter()
            .map(|p| ParticipantView::from_record(p, self.hub.is_connected(&p.id)))
            .collect()
    }

    fn pending_views(&self) -> Vec<RequesterView> {
        let mut pending: Vec<&JoinRequestRecord> = self
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        pending.into_iter().map(RequesterView::from).collect()
    }

    /// Record activity and persist the room record with a fresh TTL.
    fn touch(&mut self) {
        self.room.updated_at = unix_now();
        self.store.submit(StoreOp::PutRoom(self.room.clone()));
    }

    fn send_snapshot(&mut self, participant_id: &str) {
        let event = ServerEvent::ParticipantsUpdate {
            participants: self.views(),
        };
        if let Some(frame) = event_frame(&event) {
            if self.hub.unicast(participant_id, frame) == super::hub::Delivery::Evicted {
                self.handle_evicted(vec![participant_id.to_string()]);
            }
        }
    }

    fn broadcast(&mut self, event: &ServerEvent) {
        if let Some(frame) = event_frame(event) {
            let evicted = self.hub.broadcast_all(&frame);
            self.handle_evicted(evicted);
        }
    }

    fn broadcast_except(&mut self, excluded: &str, event: &ServerEvent) {
        if let Some(frame) = event_frame(event) {
            let evicted = self.hub.broadcast_except(excluded, &frame);
            self.handle_evicted(evicted);
        }
    }

    /// Run the departure path for connections evicted by failed delivery.
    ///
    /// Announcing a departure can itself evict more recipients, so this
    /// drains a work list until no new evictions occur.
    fn handle_evicted(&mut self, mut pending: Vec<String>) {
        while let Some(participant_id) = pending.pop() {
            self.clear_speaking(&participant_id);
            let event = ServerEvent::UserLeft { participant_id };
            if let Some(frame) = event_frame(&event) {
                pending.extend(self.hub.broadcast_all(&frame));
            }
        }
    }

    fn departed(&mut self, participant_id: &str) {
        self.clear_speaking(participant_id);
        self.broadcast(&ServerEvent::UserLeft {
            participant_id: participant_id.to_string(),
        });
    }

    fn clear_speaking(&mut self, participant_id: &str) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.id == participant_id) {
            p.is_speaking = false;
        }
    }

    fn prune_rejected_requests(&mut self) {
        let ttl = self.policy.rejected_request_ttl;
        let expired: Vec<String> = self
            .rejected_at
            .iter()
            .filter(|(_, decided)| decided.elapsed() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.rejected_at.remove(&id);
            let still_rejected = self
                .requests
                .get(&id)
                .is_some_and(|r| r.status == RequestStatus::Rejected);
            if still_rejected {
                self.requests.remove(&id);
                self.store.submit(StoreOp::DeleteRequest(id.clone()));
                debug!(
                    target: "rc.actor.room",
                    room_id = %self.room.id,
                    participant_id = %id,
                    "Pruned rejected join request"
                );
            }
        }
    }

    fn graceful_shutdown(&mut self) {
        let closed = self.hub.close_room(CloseCode::GoingAway);
        if closed > 0 {
            warn!(
                target: "rc.actor.room",
                room_id = %self.room.id,
                closed,
                "Closed live connections during shutdown"
            );
        }
    }
}
