//! `ConnectionHub` - per-room registry of live connections.
//!
//! Owned exclusively by its `RoomActor`, so every operation runs inside the
//! room's single critical section and broadcasts are naturally ordered per
//! recipient.
//!
//! Two lanes are kept apart:
//! - **members**: admitted participants; receive room broadcasts
//! - **waiting**: pending requesters; receive only targeted decisions
//!
//! Delivery is best-effort. A failed `try_deliver` evicts the recipient and
//! the operation carries on; callers get the evicted participant ids so they
//! can run the normal departure path.

use super::connection::{ConnectionHandle, Outbound};
use super::metrics::ActorMetrics;
use crate::observability::metrics as prom;
use crate::protocol::{CloseCode, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Which lane a connection lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Member,
    Waiting,
}

/// Result of a targeted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Target holds no live connection.
    NotConnected,
    /// Target's connection failed and was evicted.
    Evicted,
}

impl Delivery {
    #[must_use]
    pub fn is_delivered(self) -> bool {
        self == Delivery::Delivered
    }
}

/// Outcome of an idle sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Member connections evicted; these need a `user_left`.
    pub evicted_members: Vec<String>,
    /// Waiting connections evicted.
    pub evicted_waiting: usize,
    /// Connections that were probed.
    pub probed: usize,
}

/// Serialize an event once for fan-out.
#[must_use]
pub fn event_frame(event: &ServerEvent) -> Option<Outbound> {
    match event.to_text() {
        Ok(text) => Some(Outbound::Text(Arc::from(text))),
        Err(e) => {
            warn!(target: "rc.hub", kind = event.kind(), error = %e, "Failed to serialize event");
            None
        }
    }
}

/// Per-room connection registry.
#[derive(Debug)]
pub struct ConnectionHub {
    room_id: String,
    members: HashMap<String, ConnectionHandle>,
    waiting: HashMap<String, ConnectionHandle>,
    metrics: Arc<ActorMetrics>,
}

impl ConnectionHub {
    #[must_use]
    pub fn new(room_id: impl Into<String>, metrics: Arc<ActorMetrics>) -> Self {
        Self {
            room_id: room_id.into(),
            members: HashMap::new(),
            waiting: HashMap::new(),
            metrics,
        }
    }

    /// Register a member connection.
    ///
    /// Returns the connection it replaced, if any, for the caller to close.
    /// A waiting-lane entry for the same participant is replaced as well.
    pub fn register(&mut self, connection: ConnectionHandle) -> Option<ConnectionHandle> {
        let participant_id = connection.participant_id().to_string();
        let superseded = self
            .members
            .insert(participant_id.clone(), connection)
            .or_else(|| self.waiting.remove(&participant_id));
        if superseded.is_none() {
            self.metrics.connections_opened(1);
        }
        debug!(
            target: "rc.hub",
            room_id = %self.room_id,
            participant_id = %participant_id,
            superseded = superseded.is_some(),
            "Member connection registered"
        );
        superseded
    }

    /// Register a connection for a pending requester.
    pub fn register_waiting(&mut self, connection: ConnectionHandle) -> Option<ConnectionHandle> {
        let participant_id = connection.participant_id().to_string();
        let superseded = self.waiting.insert(participant_id.clone(), connection);
        if superseded.is_none() {
            self.metrics.connections_opened(1);
        }
        debug!(
            target: "rc.hub",
            room_id = %self.room_id,
            participant_id = %participant_id,
            superseded = superseded.is_some(),
            "Waiting connection registered"
        );
        superseded
    }

    /// Remove a connection only if it is the one currently registered.
    ///
    /// A stale handle (already superseded or evicted) is a no-op, so an
    /// older handler's cleanup can never evict a newer connection.
    pub fn unregister(&mut self, participant_id: &str, connection_id: &str) -> Option<Lane> {
        let lane = if Self::holds(&self.members, participant_id, connection_id) {
            self.members.remove(participant_id);
            Lane::Member
        } else if Self::holds(&self.waiting, participant_id, connection_id) {
            self.waiting.remove(participant_id);
            Lane::Waiting
        } else {
            return None;
        };
        self.metrics.connections_closed(1);
        Some(lane)
    }

    /// Remove a participant's member connection unconditionally.
    pub fn remove(&mut self, participant_id: &str) -> Option<ConnectionHandle> {
        let removed = self.members.remove(participant_id);
        if removed.is_some() {
            self.metrics.connections_closed(1);
        }
        removed
    }

    /// Remove a pending requester's waiting connection.
    pub fn remove_waiting(&mut self, participant_id: &str) -> Option<ConnectionHandle> {
        let removed = self.waiting.remove(participant_id);
        if removed.is_some() {
            self.metrics.connections_closed(1);
        }
        removed
    }

    /// Move a waiting connection into the member lane.
    ///
    /// Returns `false` if the participant has no waiting connection.
    pub fn promote(&mut self, participant_id: &str) -> bool {
        let Some(connection) = self.waiting.remove(participant_id) else {
            return false;
        };
        if let Some(previous) = self.members.insert(participant_id.to_string(), connection) {
            previous.close(CloseCode::Superseded);
            self.metrics.connections_closed(1);
        }
        true
    }

    /// Deliver to every member connection except one.
    pub fn broadcast_except(&mut self, excluded: &str, frame: &Outbound) -> Vec<String> {
        let failed: Vec<String> = self
            .members
            .iter()
            .filter(|(id, _)| id.as_str() != excluded)
            .filter(|(_, conn)| conn.try_deliver(frame.clone()).is_err())
            .map(|(id, _)| id.clone())
            .collect();
        self.evict(&failed);
        failed
    }

    /// Deliver to every member connection.
    pub fn broadcast_all(&mut self, frame: &Outbound) -> Vec<String> {
        let failed: Vec<String> = self
            .members
            .iter()
            .filter(|(_, conn)| conn.try_deliver(frame.clone()).is_err())
            .map(|(id, _)| id.clone())
            .collect();
        self.evict(&failed);
        failed
    }

    /// Deliver to exactly one member connection.
    pub fn unicast(&mut self, target: &str, frame: Outbound) -> Delivery {
        Self::deliver_one(&mut self.members, &self.room_id, &self.metrics, target, frame)
    }

    /// Deliver to a pending requester's waiting connection.
    pub fn notify_waiting(&mut self, target: &str, frame: Outbound) -> Delivery {
        Self::deliver_one(&mut self.waiting, &self.room_id, &self.metrics, target, frame)
    }

    /// Whether `connection_id` is the participant's current member connection.
    #[must_use]
    pub fn is_member_connection(&self, participant_id: &str, connection_id: &str) -> bool {
        Self::holds(&self.members, participant_id, connection_id)
    }

    /// Whether the participant holds a live member connection.
    #[must_use]
    pub fn is_connected(&self, participant_id: &str) -> bool {
        self.members.contains_key(participant_id)
    }

    /// True when no connection of either lane is registered.
    #[must_use]
    pub fn room_is_empty(&self) -> bool {
        self.members.is_empty() && self.waiting.is_empty()
    }

    #[must_use]
    pub fn member_connection_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn waiting_connection_count(&self) -> usize {
        self.waiting.len()
    }

    /// Close every connection with `code` and clear the registry.
    ///
    /// Returns the number of connections closed.
    pub fn close_room(&mut self, code: CloseCode) -> usize {
        let closed = self.members.len() + self.waiting.len();
        for (_, connection) in self.members.drain().chain(self.waiting.drain()) {
            connection.close(code);
        }
        if closed > 0 {
            self.metrics.connections_closed(closed);
            debug!(
                target: "rc.hub",
                room_id = %self.room_id,
                closed,
                code = code.as_u16(),
                "Room connections closed"
            );
        }
        closed
    }

    /// Evict connections idle longer than `idle_timeout` and probe the rest.
    pub fn sweep_idle(&mut self, now: Instant, idle_timeout: Duration) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        let idle_members: Vec<String> = self
            .members
            .iter()
            .filter(|(_, conn)| conn.idle_for(now) > idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        let idle_waiting: Vec<String> = self
            .waiting
            .iter()
            .filter(|(_, conn)| conn.idle_for(now) > idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle_members {
            if let Some(conn) = self.members.remove(id) {
                conn.close(CloseCode::IdleTimeout);
            }
        }
        for id in &idle_waiting {
            if let Some(conn) = self.waiting.remove(id) {
                conn.close(CloseCode::IdleTimeout);
            }
        }
        let evicted = idle_members.len() + idle_waiting.len();
        if evicted > 0 {
            self.metrics.connections_closed(evicted);
        }

        // Probe survivors; a full queue here is itself a liveness failure
        let unresponsive: Vec<String> = self
            .members
            .iter()
            .filter(|(_, conn)| conn.try_deliver(Outbound::Probe).is_err())
            .map(|(id, _)| id.clone())
            .collect();
        outcome.probed = self.members.len() + self.waiting.len();
        self.evict(&unresponsive);
        for conn in self.waiting.values() {
            let _ = conn.try_deliver(Outbound::Probe);
        }

        outcome.evicted_members = idle_members;
        outcome.evicted_members.extend(unresponsive);
        outcome.evicted_waiting = idle_waiting.len();
        outcome
    }

    fn holds(
        lane: &HashMap<String, ConnectionHandle>,
        participant_id: &str,
        connection_id: &str,
    ) -> bool {
        lane.get(participant_id)
            .is_some_and(|conn| conn.connection_id() == connection_id)
    }

    fn deliver_one(
        lane: &mut HashMap<String, ConnectionHandle>,
        room_id: &str,
        metrics: &ActorMetrics,
        target: &str,
        frame: Outbound,
    ) -> Delivery {
        let Some(connection) = lane.get(target) else {
            return Delivery::NotConnected;
        };
        match connection.try_deliver(frame) {
            Ok(()) => Delivery::Delivered,
            Err(failure) => {
                if let Some(conn) = lane.remove(target) {
                    conn.abort();
                    metrics.connections_closed(1);
                    prom::record_deliveries_evicted(1);
                }
                debug!(
                    target: "rc.hub",
                    room_id = %room_id,
                    participant_id = %target,
                    failure = ?failure,
                    "Evicted connection after failed delivery"
                );
                Delivery::Evicted
            }
        }
    }

    fn evict(&mut self, participant_ids: &[String]) {
        if participant_ids.is_empty() {
            return;
        }
        for id in participant_ids {
            if let Some(conn) = self.members.remove(id) {
                conn.abort();
            }
        }
        self.metrics.connections_closed(participant_ids.len());
        prom::record_deliveries_evicted(participant_ids.len());
        debug!(
            target: "rc.hub",
            room_id = %self.room_id,
            evicted = participant_ids.len(),
            "Evicted connections after failed delivery"
        );
    }
}
