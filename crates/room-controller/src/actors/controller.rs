//! `RoomControllerActor` - singleton supervisor for room actors.
//!
//! - Owns the map of live rooms and the root `CancellationToken`
//! - Spawns room actors, either fresh or adopted from the store
//! - Enforces the per-process room limit
//! - Detects room actors that exited or panicked (via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! On shutdown the controller stops accepting new rooms, cancels every
//! room actor (each closes its connections with `1001 Going Away`) and
//! waits for them up to a deadline.

use super::messages::{ControllerMessage, ControllerStatus, SpawnMode};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomSeed};
use crate::config::RoomPolicy;
use crate::errors::RcError;
use crate::store::RoomStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How long a removed room actor gets to finish.
const ROOM_REMOVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings the controller applies to every room it spawns.
#[derive(Clone)]
pub struct ControllerSettings {
    pub store: Arc<dyn RoomStore>,
    pub policy: RoomPolicy,
    pub max_rooms: usize,
}

/// Handle to the `RoomControllerActor`.
#[derive(Clone)]
pub struct RoomControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl RoomControllerHandle {
    /// Spawn the controller actor.
    #[must_use]
    pub fn new(settings: ControllerSettings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomControllerActor::new(settings, receiver, cancel_token.clone(), metrics);
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Spawn a room actor from a seed.
    ///
    /// With [`SpawnMode::Adopt`] an already running actor for the same id
    /// is returned instead.
    pub async fn spawn_room(
        &self,
        seed: RoomSeed,
        mode: SpawnMode,
    ) -> Result<RoomActorHandle, RcError> {
        self.request(|respond_to| ControllerMessage::SpawnRoom {
            seed,
            mode,
            respond_to,
        })
        .await?
    }

    /// Look up a live room actor.
    pub async fn get_room(&self, room_id: String) -> Result<Option<RoomActorHandle>, RcError> {
        self.request(|respond_to| ControllerMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await
    }

    /// Stop and forget a room actor. Returns `false` if it was unknown.
    pub async fn remove_room(&self, room_id: String) -> Result<bool, RcError> {
        self.request(|respond_to| ControllerMessage::RemoveRoom {
            room_id,
            respond_to,
        })
        .await
    }

    /// Handles of every live room actor.
    pub async fn list_rooms(&self) -> Result<Vec<RoomActorHandle>, RcError> {
        self.request(|respond_to| ControllerMessage::ListRooms { respond_to })
            .await
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, RcError> {
        self.request(|respond_to| ControllerMessage::GetStatus { respond_to })
            .await
    }

    /// Drain every room, waiting at most `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RcError> {
        self.request(|respond_to| ControllerMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await
    }

    /// Cancel the controller and, through child tokens, every room.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `RoomControllerActor` implementation.
pub struct RoomControllerActor {
    settings: ControllerSettings,
    receiver: mpsc::Receiver<ControllerMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<String, ManagedRoom>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomControllerActor {
    fn new(
        settings: ControllerSettings,
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            settings,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Controller, "controller"),
        }
    }

    #[instrument(skip_all, name = "rc.actor.controller")]
    async fn run(mut self) {
        info!(
            target: "rc.actor.controller",
            max_rooms = self.settings.max_rooms,
            "RoomControllerActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.controller",
                        "RoomControllerActor received cancellation signal"
                    );
                    self.drain(Duration::from_secs(30)).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "rc.actor.controller",
                                "RoomControllerActor channel closed, exiting"
                            );
                            self.drain(Duration::from_secs(30)).await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.controller",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::SpawnRoom {
                seed,
                mode,
                respond_to,
            } => {
                let _ = respond_to.send(self.spawn_room(seed, mode));
            }
            ControllerMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let handle = self.rooms.get(&room_id).map(|m| m.handle.clone());
                let _ = respond_to.send(handle);
            }
            ControllerMessage::RemoveRoom {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.remove_room(&room_id));
            }
            ControllerMessage::ListRooms { respond_to } => {
                let handles = self.rooms.values().map(|m| m.handle.clone()).collect();
                let _ = respond_to.send(handles);
            }
            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }
            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                info!(
                    target: "rc.actor.controller",
                    room_count = self.rooms.len(),
                    "Initiating graceful shutdown"
                );
                self.drain(deadline).await;
                self.cancel_token.cancel();
                let _ = respond_to.send(());
            }
        }
    }

    fn spawn_room(&mut self, seed: RoomSeed, mode: SpawnMode) -> Result<RoomActorHandle, RcError> {
        if !self.accepting_new {
            return Err(RcError::Draining);
        }

        let room_id = seed.room.id.clone();
        if let Some(existing) = self.rooms.get(&room_id) {
            return match mode {
                SpawnMode::Adopt => Ok(existing.handle.clone()),
                SpawnMode::Create => Err(RcError::Conflict("room id already in use".to_string())),
            };
        }
        if mode == SpawnMode::Create && self.rooms.len() >= self.settings.max_rooms {
            warn!(
                target: "rc.actor.controller",
                room_count = self.rooms.len(),
                "Room limit reached, refusing new room"
            );
            return Err(RcError::Conflict("room limit reached".to_string()));
        }

        let (handle, task_handle) = RoomActor::spawn(
            seed,
            Arc::clone(&self.settings.store),
            self.settings.policy,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.room_created();

        info!(
            target: "rc.actor.controller",
            room_id = %room_id,
            mode = ?mode,
            total_rooms = self.rooms.len(),
            "Room actor spawned"
        );
        Ok(handle)
    }

    /// Cancel a room actor without blocking the message loop.
    fn remove_room(&mut self, room_id: &str) -> bool {
        let Some(managed) = self.rooms.remove(room_id) else {
            return false;
        };
        managed.handle.cancel();

        let room_id_owned = room_id.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_REMOVAL_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.controller",
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        self.metrics.room_removed();
        info!(
            target: "rc.actor.controller",
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor removed"
        );
        true
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Cancel every room and wait for their tasks until `deadline` passes.
    async fn drain(&mut self, deadline: Duration) {
        self.accepting_new = false;
        if self.rooms.is_empty() {
            return;
        }
        info!(
            target: "rc.actor.controller",
            room_count = self.rooms.len(),
            "Draining room actors"
        );

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        let until = tokio::time::Instant::now() + deadline;
        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout_at(until, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(target: "rc.actor.controller", "Graceful shutdown complete");
    }

    /// Reap room actors whose task has ended.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        error = ?join_error,
                        "Room actor panicked; room state lost from memory"
                    );
                    self.metrics.record_panic(ActorType::Room);
                }
                Err(_) => {}
            }
            self.metrics.room_removed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{MemoryRoomStore, RoomRecord};

    fn settings(max_rooms: usize) -> ControllerSettings {
        ControllerSettings {
            store: Arc::new(MemoryRoomStore::new()),
            policy: RoomPolicy::default(),
            max_rooms,
        }
    }

    fn seed(id: &str) -> RoomSeed {
        RoomSeed::new(RoomRecord {
            id: id.to_string(),
            name: "Room".to_string(),
            password: None,
            creator_id: "creator".to_string(),
            creator_name: "Creator".to_string(),
            max_participants: 4,
            requires_password: false,
            has_waiting_room: false,
            is_active: true,
            created_at: 0,
            updated_at: 0,
        })
    }

    #[tokio::test]
    async fn test_spawn_and_get_room() {
        let controller = RoomControllerHandle::new(settings(10), ActorMetrics::new());

        let handle = controller
            .spawn_room(seed("r1"), SpawnMode::Create)
            .await
            .unwrap();
        assert_eq!(handle.room_id(), "r1");

        let found = controller.get_room("r1".to_string()).await.unwrap();
        assert!(found.is_some());
        assert!(controller.get_room("r2".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_collision_and_adopt() {
        let controller = RoomControllerHandle::new(settings(10), ActorMetrics::new());
        controller
            .spawn_room(seed("r1"), SpawnMode::Create)
            .await
            .unwrap();

        let err = controller
            .spawn_room(seed("r1"), SpawnMode::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, RcError::Conflict(_)));

        let adopted = controller
            .spawn_room(seed("r1"), SpawnMode::Adopt)
            .await
            .unwrap();
        assert_eq!(adopted.room_id(), "r1");
        assert_eq!(controller.get_status().await.unwrap().room_count, 1);
    }

    #[tokio::test]
    async fn test_room_limit() {
        let controller = RoomControllerHandle::new(settings(1), ActorMetrics::new());
        controller
            .spawn_room(seed("r1"), SpawnMode::Create)
            .await
            .unwrap();
        let err = controller
            .spawn_room(seed("r2"), SpawnMode::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, RcError::Conflict(ref m) if m.contains("limit")));
    }

    #[tokio::test]
    async fn test_remove_room_cancels_actor() {
        let metrics = ActorMetrics::new();
        let controller = RoomControllerHandle::new(settings(10), Arc::clone(&metrics));
        let handle = controller
            .spawn_room(seed("r1"), SpawnMode::Create)
            .await
            .unwrap();
        assert_eq!(metrics.room_count(), 1);

        assert!(controller.remove_room("r1".to_string()).await.unwrap());
        assert!(handle.is_cancelled());
        assert_eq!(metrics.room_count(), 0);
        assert!(!controller.remove_room("r1".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_refuses_new_rooms() {
        let controller = RoomControllerHandle::new(settings(10), ActorMetrics::new());
        let handle = controller
            .spawn_room(seed("r1"), SpawnMode::Create)
            .await
            .unwrap();

        controller.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(handle.is_cancelled());
        assert!(controller.is_cancelled());
    }

    #[tokio::test]
    async fn test_spawn_while_draining_fails() {
        let mut actor = RoomControllerActor::new(
            settings(10),
            mpsc::channel(1).1,
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        actor.accepting_new = false;
        let err = actor.spawn_room(seed("r1"), SpawnMode::Create).unwrap_err();
        assert!(matches!(err, RcError::Draining));
    }
}
