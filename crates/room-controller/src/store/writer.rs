//! Ordered write-behind persistence for a single room.
//!
//! The room actor submits operations without awaiting; a dedicated task
//! applies them to the store in submission order. Failures are logged and
//! counted but never fail the room operation that produced them.

use super::{JoinRequestRecord, ParticipantRecord, RoomRecord, RoomStore};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A single persistence operation for one room.
#[derive(Debug)]
pub enum StoreOp {
    PutRoom(RoomRecord),
    DeleteRoom,
    PutParticipant(ParticipantRecord),
    DeleteParticipant(String),
    PutRequest(JoinRequestRecord),
    DeleteRequest(String),
    /// Resolves once every earlier operation has been applied.
    Flush(oneshot::Sender<()>),
}

impl StoreOp {
    fn name(&self) -> &'static str {
        match self {
            StoreOp::PutRoom(_) => "put_room",
            StoreOp::DeleteRoom => "delete_room",
            StoreOp::PutParticipant(_) => "put_participant",
            StoreOp::DeleteParticipant(_) => "delete_participant",
            StoreOp::PutRequest(_) => "put_request",
            StoreOp::DeleteRequest(_) => "delete_request",
            StoreOp::Flush(_) => "flush",
        }
    }
}

/// Handle used by a room actor to queue persistence.
///
/// The queue is unbounded so that submitting never suspends the actor.
/// Its depth is bounded in practice by the actor's own mailbox.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    room_id: String,
    sender: mpsc::UnboundedSender<StoreOp>,
}

impl StoreWriter {
    /// Spawn the writer task for a room.
    ///
    /// The task exits once every `StoreWriter` clone is dropped and the
    /// queue is drained.
    pub fn spawn(
        store: Arc<dyn RoomStore>,
        room_id: String,
        room_ttl: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(store, room_id.clone(), room_ttl, receiver));
        (Self { room_id, sender }, task)
    }

    /// Queue an operation.
    pub fn submit(&self, op: StoreOp) {
        if let Err(e) = self.sender.send(op) {
            warn!(
                target: "rc.store",
                room_id = %self.room_id,
                operation = e.0.name(),
                "Store writer closed, dropping operation"
            );
        }
    }

    /// Wait until all previously submitted operations are applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.submit(StoreOp::Flush(tx));
        let _ = rx.await;
    }
}

async fn run(
    store: Arc<dyn RoomStore>,
    room_id: String,
    room_ttl: Duration,
    mut receiver: mpsc::UnboundedReceiver<StoreOp>,
) {
    while let Some(op) = receiver.recv().await {
        let name = op.name();
        let start = Instant::now();
        let result = match op {
            StoreOp::PutRoom(room) => store.put_room(&room, room_ttl).await,
            StoreOp::DeleteRoom => store.delete_room(&room_id).await,
            StoreOp::PutParticipant(p) => store.put_participant(&room_id, &p).await,
            StoreOp::DeleteParticipant(id) => store.delete_participant(&room_id, &id).await,
            StoreOp::PutRequest(r) => store.put_request(&room_id, &r).await,
            StoreOp::DeleteRequest(id) => store.delete_request(&room_id, &id).await,
            StoreOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        metrics::record_store_operation(name, start.elapsed(), result.is_ok());
        if let Err(e) = result {
            warn!(
                target: "rc.store",
                room_id = %room_id,
                operation = name,
                error = %e,
                "Write-behind store operation failed"
            );
        }
    }
    debug!(target: "rc.store", room_id = %room_id, "Store writer stopped");
}
