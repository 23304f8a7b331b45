//! In-process room store.
//!
//! Room TTLs are tracked with `tokio::time::Instant` deadlines and enforced
//! lazily on read, so paused-clock tests can drive expiry.

use super::{sort_participants, JoinRequestRecord, ParticipantRecord, RoomRecord, RoomStore};
use crate::errors::RcError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug)]
struct StoredRoom {
    record: RoomRecord,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<String, StoredRoom>,
    participants: HashMap<String, HashMap<String, ParticipantRecord>>,
    requests: HashMap<String, HashMap<String, JoinRequestRecord>>,
    user_rooms: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn remove_room(&mut self, room_id: &str) {
        self.rooms.remove(room_id);
        self.requests.remove(room_id);
        if let Some(participants) = self.participants.remove(room_id) {
            for user_id in participants.keys() {
                self.unlink_user(user_id, room_id);
            }
        }
    }

    fn unlink_user(&mut self, user_id: &str, room_id: &str) {
        if let Some(rooms) = self.user_rooms.get_mut(user_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                self.user_rooms.remove(user_id);
            }
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, stored)| stored.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for room_id in expired {
            self.remove_room(&room_id);
        }
    }
}

/// Room store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    inner: RwLock<Inner>,
}

impl MemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired rooms.
    pub async fn room_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .rooms
            .values()
            .filter(|stored| stored.expires_at > now)
            .count()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>, RcError> {
        let now = Instant::now();
        {
            let inner = self.inner.read().await;
            match inner.rooms.get(room_id) {
                None => return Ok(None),
                Some(stored) if stored.expires_at > now => {
                    return Ok(Some(stored.record.clone()));
                }
                Some(_) => {}
            }
        }
        self.inner.write().await.remove_room(room_id);
        Ok(None)
    }

    async fn put_room(&self, room: &RoomRecord, ttl: Duration) -> Result<(), RcError> {
        let mut inner = self.inner.write().await;
        inner.rooms.insert(
            room.id.clone(),
            StoredRoom {
                record: room.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), RcError> {
        self.inner.write().await.remove_room(room_id);
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomRecord>, RcError> {
        let mut inner = self.inner.write().await;
        inner.purge_expired(Instant::now());
        let mut rooms: Vec<RoomRecord> = inner
            .rooms
            .values()
            .map(|stored| stored.record.clone())
            .collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rooms)
    }

    async fn get_participants(&self, room_id: &str) -> Result<Vec<ParticipantRecord>, RcError> {
        let inner = self.inner.read().await;
        let mut participants: Vec<ParticipantRecord> = inner
            .participants
            .get(room_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        sort_participants(&mut participants);
        Ok(participants)
    }

    async fn put_participant(
        &self,
        room_id: &str,
        participant: &ParticipantRecord,
    ) -> Result<(), RcError> {
        let mut inner = self.inner.write().await;
        inner
            .participants
            .entry(room_id.to_string())
            .or_default()
            .insert(participant.id.clone(), participant.clone());
        inner
            .user_rooms
            .entry(participant.id.clone())
            .or_default()
            .insert(room_id.to_string());
        Ok(())
    }

    async fn delete_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<(), RcError> {
        let mut inner = self.inner.write().await;
        if let Some(participants) = inner.participants.get_mut(room_id) {
            participants.remove(participant_id);
        }
        inner.unlink_user(participant_id, room_id);
        Ok(())
    }

    async fn get_requests(&self, room_id: &str) -> Result<Vec<JoinRequestRecord>, RcError> {
        let inner = self.inner.read().await;
        let mut requests: Vec<JoinRequestRecord> = inner
            .requests
            .get(room_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        requests.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        Ok(requests)
    }

    async fn put_request(
        &self,
        room_id: &str,
        request: &JoinRequestRecord,
    ) -> Result<(), RcError> {
        self.inner
            .write()
            .await
            .requests
            .entry(room_id.to_string())
            .or_default()
            .insert(request.participant_id.clone(), request.clone());
        Ok(())
    }

    async fn delete_request(&self, room_id: &str, participant_id: &str) -> Result<(), RcError> {
        if let Some(requests) = self.inner.write().await.requests.get_mut(room_id) {
            requests.remove(participant_id);
        }
        Ok(())
    }

    async fn get_user_rooms(&self, user_id: &str) -> Result<Vec<String>, RcError> {
        let inner = self.inner.read().await;
        let mut rooms: Vec<String> = inner
            .user_rooms
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        Ok(rooms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::RequestStatus;

    fn room(id: &str) -> RoomRecord {
        RoomRecord {
            id: id.to_string(),
            name: "Room".to_string(),
            password: None,
            creator_id: "creator".to_string(),
            creator_name: "Creator".to_string(),
            max_participants: 4,
            requires_password: false,
            has_waiting_room: true,
            is_active: true,
            created_at: 100,
            updated_at: 100,
        }
    }

    fn participant(id: &str, joined_at: i64) -> ParticipantRecord {
        ParticipantRecord {
            id: id.to_string(),
            name: id.to_uppercase(),
            is_creator: false,
            is_muted: false,
            is_speaking: false,
            joined_at,
        }
    }

    #[tokio::test]
    async fn test_put_and_get_room() {
        let store = MemoryRoomStore::new();
        store.put_room(&room("r1"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get_room("r1").await.unwrap(), Some(room("r1")));
        assert_eq!(store.get_room("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_expires_after_ttl() {
        let store = MemoryRoomStore::new();
        store.put_room(&room("r1"), Duration::from_secs(60)).await.unwrap();
        store.put_participant("r1", &participant("alice", 1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get_room("r1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get_room("r1").await.unwrap().is_none());
        assert!(store.get_participants("r1").await.unwrap().is_empty());
        assert!(store.get_user_rooms("alice").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_room_refreshes_ttl() {
        let store = MemoryRoomStore::new();
        store.put_room(&room("r1"), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        store.put_room(&room("r1"), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(store.get_room("r1").await.unwrap().is_some());
        assert_eq!(store.list_rooms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_participants_hash_semantics_and_order() {
        let store = MemoryRoomStore::new();
        store.put_participant("r1", &participant("bob", 2)).await.unwrap();
        store.put_participant("r1", &participant("alice", 1)).await.unwrap();
        store.put_participant("r1", &participant("bob", 2)).await.unwrap();

        let ids: Vec<String> = store
            .get_participants("r1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, ["alice", "bob"]);
        assert_eq!(store.get_user_rooms("bob").await.unwrap(), ["r1"]);

        store.delete_participant("r1", "bob").await.unwrap();
        assert_eq!(store.get_participants("r1").await.unwrap().len(), 1);
        assert!(store.get_user_rooms("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_requests_filter() {
        let store = MemoryRoomStore::new();
        let pending = JoinRequestRecord {
            participant_id: "bob".to_string(),
            display_name: "Bob".to_string(),
            requested_at: 1,
            status: RequestStatus::Pending,
            decided_at: None,
        };
        let rejected = JoinRequestRecord {
            participant_id: "eve".to_string(),
            status: RequestStatus::Rejected,
            decided_at: Some(2),
            ..pending.clone()
        };
        store.put_request("r1", &pending).await.unwrap();
        store.put_request("r1", &rejected).await.unwrap();

        assert_eq!(store.get_requests("r1").await.unwrap().len(), 2);
        assert_eq!(store.get_pending_requests("r1").await.unwrap(), [pending]);

        store.delete_request("r1", "bob").await.unwrap();
        assert!(store.get_pending_requests("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_room_removes_companions() {
        let store = MemoryRoomStore::new();
        store.put_room(&room("r1"), Duration::from_secs(60)).await.unwrap();
        store.put_participant("r1", &participant("alice", 1)).await.unwrap();

        store.delete_room("r1").await.unwrap();

        assert!(store.get_room("r1").await.unwrap().is_none());
        assert!(store.get_participants("r1").await.unwrap().is_empty());
        assert!(store.get_user_rooms("alice").await.unwrap().is_empty());
        assert_eq!(store.room_count().await, 0);
    }
}
