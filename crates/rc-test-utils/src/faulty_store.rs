//! Room store wrapper for failure-path testing.
//!
//! Delegates to an inner store, counts calls per operation, and fails
//! operations on demand with `RcError::Store`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rc_test_utils::{FaultyRoomStore, StoreOperation};
//!
//! let store = Arc::new(FaultyRoomStore::in_memory());
//! store.fail(StoreOperation::PutRoom);
//! // ... drive the coordinator, then
//! assert!(store.calls(StoreOperation::PutRoom) > 0);
//! ```

use async_trait::async_trait;
use room_controller::errors::RcError;
use room_controller::store::{
    JoinRequestRecord, MemoryRoomStore, ParticipantRecord, RoomRecord, RoomStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store operations that can be counted or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetRoom,
    PutRoom,
    DeleteRoom,
    ListRooms,
    GetParticipants,
    PutParticipant,
    DeleteParticipant,
    GetRequests,
    PutRequest,
    DeleteRequest,
    GetUserRooms,
}

#[derive(Debug, Default)]
struct FaultState {
    failing: HashSet<StoreOperation>,
    calls: HashMap<StoreOperation, usize>,
}

/// Failure-injecting store wrapper.
pub struct FaultyRoomStore {
    inner: Arc<dyn RoomStore>,
    state: Mutex<FaultState>,
}

impl FaultyRoomStore {
    #[must_use]
    pub fn new(inner: Arc<dyn RoomStore>) -> Self {
        Self {
            inner,
            state: Mutex::new(FaultState::default()),
        }
    }

    /// Wrap a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRoomStore::new()))
    }

    /// The wrapped store, bypassing fault injection.
    #[must_use]
    pub fn inner(&self) -> Arc<dyn RoomStore> {
        Arc::clone(&self.inner)
    }

    /// Make `operation` fail until [`Self::heal`] is called.
    pub fn fail(&self, operation: StoreOperation) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    /// Stop failing every operation.
    pub fn heal(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    /// Number of calls to `operation`, failed ones included.
    #[must_use]
    pub fn calls(&self, operation: StoreOperation) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    fn enter(&self, operation: StoreOperation) -> Result<(), RcError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_insert(0) += 1;
        if state.failing.contains(&operation) {
            return Err(RcError::Store(format!("injected failure: {operation:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RoomStore for FaultyRoomStore {
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>, RcError> {
        self.enter(StoreOperation::GetRoom)?;
        self.inner.get_room(room_id).await
    }

    async fn put_room(&self, room: &RoomRecord, ttl: Duration) -> Result<(), RcError> {
        self.enter(StoreOperation::PutRoom)?;
        self.inner.put_room(room, ttl).await
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), RcError> {
        self.enter(StoreOperation::DeleteRoom)?;
        self.inner.delete_room(room_id).await
    }

    async fn list_rooms(&self) -> Result<Vec<RoomRecord>, RcError> {
        self.enter(StoreOperation::ListRooms)?;
        self.inner.list_rooms().await
    }

    async fn get_participants(&self, room_id: &str) -> Result<Vec<ParticipantRecord>, RcError> {
        self.enter(StoreOperation::GetParticipants)?;
        self.inner.get_participants(room_id).await
    }

    async fn put_participant(
        &self,
        room_id: &str,
        participant: &ParticipantRecord,
    ) -> Result<(), RcError> {
        self.enter(StoreOperation::PutParticipant)?;
        self.inner.put_participant(room_id, participant).await
    }

    async fn delete_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<(), RcError> {
        self.enter(StoreOperation::DeleteParticipant)?;
        self.inner.delete_participant(room_id, participant_id).await
    }

    async fn get_requests(&self, room_id: &str) -> Result<Vec<JoinRequestRecord>, RcError> {
        self.enter(StoreOperation::GetRequests)?;
        self.inner.get_requests(room_id).await
    }

    async fn put_request(
        &self,
        room_id: &str,
        request: &JoinRequestRecord,
    ) -> Result<(), RcError> {
        self.enter(StoreOperation::PutRequest)?;
        self.inner.put_request(room_id, request).await
    }

    async fn delete_request(&self, room_id: &str, participant_id: &str) -> Result<(), RcError> {
        self.enter(StoreOperation::DeleteRequest)?;
        self.inner.delete_request(room_id, participant_id).await
    }

    async fn get_user_rooms(&self, user_id: &str) -> Result<Vec<String>, RcError> {
        self.enter(StoreOperation::GetUserRooms)?;
        self.inner.get_user_rooms(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_and_injects_failures() {
        let store = FaultyRoomStore::in_memory();
        assert!(store.list_rooms().await.unwrap().is_empty());
        assert_eq!(store.calls(StoreOperation::ListRooms), 1);

        store.fail(StoreOperation::ListRooms);
        assert!(matches!(
            store.list_rooms().await.unwrap_err(),
            RcError::Store(_)
        ));
        assert_eq!(store.calls(StoreOperation::ListRooms), 2);

        store.heal();
        assert!(store.list_rooms().await.is_ok());
        assert_eq!(store.calls(StoreOperation::GetRoom), 0);
    }
}
