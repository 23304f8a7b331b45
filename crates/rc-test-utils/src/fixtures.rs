//! Pre-configured test data fixtures for RC testing.

use common::types::{unix_now, Identity};
use room_controller::actors::ActorMetrics;
use room_controller::config::RoomPolicy;
use room_controller::coordinator::{RoomCoordinator, RoomSpec};
use room_controller::store::{MemoryRoomStore, RoomRecord, RoomStore};
use std::sync::Arc;
use uuid::Uuid;

/// Default room limit used by test coordinators.
pub const TEST_MAX_ROOMS: usize = 64;

/// Test user fixture.
#[derive(Debug, Clone)]
pub struct TestUser {
    /// Stable user id.
    pub user_id: String,
    /// Display name.
    pub name: String,
}

impl TestUser {
    /// Create a user whose id and display name are both `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            user_id: id,
        }
    }

    /// Create a user with a random id.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("user-{}", Uuid::new_v4()))
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::new(self.user_id.clone(), self.name.clone())
    }
}

/// Test room fixture.
///
/// Defaults match a freshly created room: capacity 10, waiting room on,
/// no password.
#[derive(Debug, Clone)]
pub struct TestRoom {
    /// Room name.
    pub name: String,
    /// Optional password.
    pub password: Option<String>,
    /// Capacity.
    pub max_participants: u32,
    /// Whether joins queue for approval.
    pub has_waiting_room: bool,
}

impl TestRoom {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
            max_participants: 10,
            has_waiting_room: true,
        }
    }

    /// Require a password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_max_participants(mut self, max: u32) -> Self {
        self.max_participants = max;
        self
    }

    /// Admit joiners directly instead of queueing them.
    #[must_use]
    pub fn open(mut self) -> Self {
        self.has_waiting_room = false;
        self
    }

    /// Creation request for [`RoomCoordinator::create_room`].
    #[must_use]
    pub fn spec(&self) -> RoomSpec {
        RoomSpec {
            name: self.name.clone(),
            password: self.password.clone(),
            max_participants: Some(self.max_participants),
            requires_password: Some(self.password.is_some()),
            has_waiting_room: Some(self.has_waiting_room),
        }
    }

    /// Store record, for seeding a store directly.
    #[must_use]
    pub fn record(&self, room_id: impl Into<String>, creator: &TestUser) -> RoomRecord {
        let now = unix_now();
        RoomRecord {
            id: room_id.into(),
            name: self.name.clone(),
            password: self.password.clone(),
            creator_id: creator.user_id.clone(),
            creator_name: creator.name.clone(),
            max_participants: self.max_participants,
            requires_password: self.password.is_some(),
            has_waiting_room: self.has_waiting_room,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Coordinator over a fresh in-memory store with default policy.
#[must_use]
pub fn memory_coordinator() -> RoomCoordinator {
    coordinator_with_store(Arc::new(MemoryRoomStore::new()))
}

/// Coordinator over the given store with default policy.
#[must_use]
pub fn coordinator_with_store(store: Arc<dyn RoomStore>) -> RoomCoordinator {
    coordinator_with(store, RoomPolicy::default(), TEST_MAX_ROOMS)
}

/// Coordinator with explicit policy and room limit.
#[must_use]
pub fn coordinator_with(
    store: Arc<dyn RoomStore>,
    policy: RoomPolicy,
    max_rooms: usize,
) -> RoomCoordinator {
    RoomCoordinator::new(store, policy, max_rooms, ActorMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_spec_defaults() {
        let spec = TestRoom::new("Standup").spec();
        assert_eq!(spec.max_participants, Some(10));
        assert_eq!(spec.requires_password, Some(false));
        assert_eq!(spec.has_waiting_room, Some(true));

        let spec = TestRoom::new("Standup").with_password("pw").open().spec();
        assert_eq!(spec.requires_password, Some(true));
        assert_eq!(spec.has_waiting_room, Some(false));
    }

    #[test]
    fn test_user_identity() {
        let user = TestUser::new("alice").with_name("Alice");
        let identity = user.identity();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.display_name, "Alice");
    }
}
