//! Redis-backed room store.
//!
//! # Key Patterns
//!
//! - `room:{id}` - Room metadata (JSON string, `EX` inactivity TTL)
//! - `room_participants:{id}` - Members (HASH, participant id -> JSON)
//! - `room_requests:{id}` - Join requests (HASH, participant id -> JSON)
//! - `user_rooms:{user_id}` - Rooms a user belongs to (SET)
//!
//! Every write refreshes the TTL of the keys it touches, and writing the
//! room also refreshes both companion hashes, so an idle room disappears as
//! a unit. `user_rooms` sets carry the same TTL and drop ids whose room key
//! has expired when read.
//!
//! The `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently, so each operation clones it instead of locking.

use super::{sort_participants, JoinRequestRecord, ParticipantRecord, RoomRecord, RoomStore};
use crate::errors::RcError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Pipeline, RedisError};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, warn};

const SCAN_BATCH: usize = 100;

fn room_key(room_id: &str) -> String {
    format!("room:{room_id}")
}

fn participants_key(room_id: &str) -> String {
    format!("room_participants:{room_id}")
}

fn requests_key(room_id: &str) -> String {
    format!("room_requests:{room_id}")
}

fn user_rooms_key(user_id: &str) -> String {
    format!("user_rooms:{user_id}")
}

fn store_error(operation: &'static str) -> impl Fn(RedisError) -> RcError {
    move |e| {
        warn!(target: "rc.store", operation, error = %e, "Redis operation failed");
        RcError::Store(format!("{operation} failed: {e}"))
    }
}

/// Decode hash values, skipping entries that no longer parse.
fn decode_values<T: DeserializeOwned>(
    key: &str,
    raw: HashMap<String, String>,
) -> Vec<T> {
    raw.into_iter()
        .filter_map(|(field, json)| match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(target: "rc.store", key, field = %field, error = %e, "Skipping undecodable entry");
                None
            }
        })
        .collect()
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

fn put_room_pipeline(room: &RoomRecord, json: String, ttl: Duration) -> Pipeline {
    let ttl = ttl_secs(ttl);
    let mut pipe = redis::pipe();
    pipe.atomic()
        .cmd("SET")
        .arg(room_key(&room.id))
        .arg(json)
        .arg("EX")
        .arg(ttl)
        .ignore()
        .expire(participants_key(&room.id), ttl)
        .ignore()
        .expire(requests_key(&room.id), ttl)
        .ignore();
    pipe
}

fn put_participant_pipeline(
    room_id: &str,
    participant_id: &str,
    json: String,
    ttl: Duration,
) -> Pipeline {
    let ttl = ttl_secs(ttl);
    let mut pipe = redis::pipe();
    pipe.atomic()
        .hset(participants_key(room_id), participant_id, json)
        .ignore()
        .expire(participants_key(room_id), ttl)
        .ignore()
        .sadd(user_rooms_key(participant_id), room_id)
        .ignore()
        .expire(user_rooms_key(participant_id), ttl)
        .ignore();
    pipe
}

fn delete_participant_pipeline(room_id: &str, participant_id: &str) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .hdel(participants_key(room_id), participant_id)
        .ignore()
        .srem(user_rooms_key(participant_id), room_id)
        .ignore();
    pipe
}

fn put_request_pipeline(
    room_id: &str,
    participant_id: &str,
    json: String,
    ttl: Duration,
) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .hset(requests_key(room_id), participant_id, json)
        .ignore()
        .expire(requests_key(room_id), ttl_secs(ttl))
        .ignore();
    pipe
}

fn delete_room_pipeline(room_id: &str, members: &[String]) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for user_id in members {
        pipe.srem(user_rooms_key(user_id), room_id).ignore();
    }
    let keys = vec![
        room_key(room_id),
        participants_key(room_id),
        requests_key(room_id),
    ];
    pipe.del(keys).ignore();
    pipe
}

/// Room store backed by Redis.
#[derive(Clone)]
pub struct RedisRoomStore {
    connection: MultiplexedConnection,
    /// TTL applied to membership writes.
    ttl: Duration,
}

impl RedisRoomStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Store` if the client cannot be opened or connected.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, RcError> {
        // Do NOT log redis_url, it may contain credentials
        let client = Client::open(redis_url).map_err(|e| {
            error!(target: "rc.store", error = %e, "Failed to open Redis client");
            RcError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "rc.store", error = %e, "Failed to connect to Redis");
                RcError::Store(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection, ttl })
    }

    /// Construct from an existing connection.
    #[must_use]
    pub fn from_connection(connection: MultiplexedConnection, ttl: Duration) -> Self {
        Self { connection, ttl }
    }

    /// Shared connection, for other Redis-backed components.
    #[must_use]
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    async fn scan_room_keys(&self) -> Result<Vec<String>, RcError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("room:*")
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(store_error("scan_rooms"))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl RoomStore for RedisRoomStore {
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>, RcError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(room_key(room_id))
            .await
            .map_err(store_error("get_room"))?;
        raw.map(|json| serde_json::from_str(&json).map_err(RcError::from))
            .transpose()
    }

    async fn put_room(&self, room: &RoomRecord, ttl: Duration) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(room)?;
        put_room_pipeline(room, json, ttl)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("put_room"))
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .hkeys(participants_key(room_id))
            .await
            .map_err(store_error("delete_room"))?;

        delete_room_pipeline(room_id, &members)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("delete_room"))
    }

    async fn list_rooms(&self) -> Result<Vec<RoomRecord>, RcError> {
        let keys = self.scan_room_keys().await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(store_error("list_rooms"))?;

        // Keys can expire between SCAN and MGET
        let mut rooms: Vec<RoomRecord> = raw
            .into_iter()
            .flatten()
            .filter_map(|json| match serde_json::from_str(&json) {
                Ok(room) => Some(room),
                Err(e) => {
                    warn!(target: "rc.store", error = %e, "Skipping undecodable room");
                    None
                }
            })
            .collect();
        rooms.sort_by(|a: &RoomRecord, b: &RoomRecord| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });
        Ok(rooms)
    }

    async fn get_participants(&self, room_id: &str) -> Result<Vec<ParticipantRecord>, RcError> {
        let mut conn = self.connection.clone();
        let key = participants_key(room_id);
        let raw: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(store_error("get_participants"))?;
        let mut participants = decode_values(&key, raw);
        sort_participants(&mut participants);
        Ok(participants)
    }

    async fn put_participant(
        &self,
        room_id: &str,
        participant: &ParticipantRecord,
    ) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(participant)?;
        put_participant_pipeline(room_id, &participant.id, json, self.ttl)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("put_participant"))
    }

    async fn delete_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        delete_participant_pipeline(room_id, participant_id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("delete_participant"))
    }

    async fn get_requests(&self, room_id: &str) -> Result<Vec<JoinRequestRecord>, RcError> {
        let mut conn = self.connection.clone();
        let key = requests_key(room_id);
        let raw: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(store_error("get_requests"))?;
        let mut requests: Vec<JoinRequestRecord> = decode_values(&key, raw);
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
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(request)?;
        put_request_pipeline(room_id, &request.participant_id, json, self.ttl)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error("put_request"))
    }

    async fn delete_request(&self, room_id: &str, participant_id: &str) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        conn.hdel::<_, _, ()>(requests_key(room_id), participant_id)
            .await
            .map_err(store_error("delete_request"))
    }

    async fn get_user_rooms(&self, user_id: &str) -> Result<Vec<String>, RcError> {
        let mut conn = self.connection.clone();
        let key = user_rooms_key(user_id);
        let rooms: Vec<String> = conn
            .smembers(&key)
            .await
            .map_err(store_error("get_user_rooms"))?;
        if rooms.is_empty() {
            return Ok(rooms);
        }

        let mut exists = redis::pipe();
        for room_id in &rooms {
            exists.exists(room_key(room_id));
        }
        let live: Vec<bool> = exists
            .query_async(&mut conn)
            .await
            .map_err(store_error("get_user_rooms"))?;

        let mut kept = Vec::with_capacity(rooms.len());
        let mut stale = Vec::new();
        for (room_id, live) in rooms.into_iter().zip(live) {
            if live {
                kept.push(room_id);
            } else {
                stale.push(room_id);
            }
        }
        if !stale.is_empty() {
            // Best effort: the set is pruned again on the next read
            if let Err(e) = conn.srem::<_, _, ()>(&key, &stale).await {
                warn!(target: "rc.store", error = %e, "Failed to prune user rooms");
            }
        }
        kept.sort();
        Ok(kept)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(room_key("abcd1234"), "room:abcd1234");
        assert_eq!(participants_key("abcd1234"), "room_participants:abcd1234");
        assert_eq!(requests_key("abcd1234"), "room_requests:abcd1234");
        assert_eq!(user_rooms_key("u1"), "user_rooms:u1");
    }

    #[test]
    fn test_decode_values_skips_garbage() {
        let raw = HashMap::from([
            (
                "alice".to_string(),
                r#"{"id":"alice","name":"Alice","is_creator":true,"is_muted":false,"is_speaking":false,"joined_at":1}"#
                    .to_string(),
            ),
            ("bob".to_string(), "{not json".to_string()),
        ]);
        let decoded: Vec<ParticipantRecord> = decode_values("room_participants:r1", raw);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.first().map(|p| p.id.as_str()), Some("alice"));
    }

    /// Each pipeline command rendered as its argument strings.
    fn rendered(pipe: &Pipeline) -> Vec<Vec<String>> {
        pipe.cmd_iter()
            .map(|cmd| {
                cmd.args_iter()
                    .map(|arg| match arg {
                        redis::Arg::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                        redis::Arg::Cursor => "<cursor>".to_string(),
                    })
                    .collect()
            })
            .collect()
    }

    fn room(id: &str) -> RoomRecord {
        RoomRecord {
            id: id.to_string(),
            name: "Standup".to_string(),
            creator_id: "alice".to_string(),
            creator_name: "Alice".to_string(),
            max_participants: 4,
            password: None,
            requires_password: false,
            has_waiting_room: true,
            is_active: true,
            created_at: 1,
            updated_at: 1,
        }
    }

    const TTL: Duration = Duration::from_secs(21_600);

    #[test]
    fn test_put_room_refreshes_companion_ttls() {
        let cmds = rendered(&put_room_pipeline(&room("r1"), "{}".to_string(), TTL));
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], ["SET", "room:r1", "{}", "EX", "21600"]);
        assert_eq!(cmds[1], ["EXPIRE", "room_participants:r1", "21600"]);
        assert_eq!(cmds[2], ["EXPIRE", "room_requests:r1", "21600"]);
    }

    #[test]
    fn test_put_participant_sets_ttl_on_hash_and_user_set() {
        let cmds = rendered(&put_participant_pipeline("r1", "bob", "{}".to_string(), TTL));
        assert_eq!(
            cmds,
            [
                vec!["HSET", "room_participants:r1", "bob", "{}"],
                vec!["EXPIRE", "room_participants:r1", "21600"],
                vec!["SADD", "user_rooms:bob", "r1"],
                vec!["EXPIRE", "user_rooms:bob", "21600"],
            ]
        );
    }

    #[test]
    fn test_put_request_sets_ttl() {
        let cmds = rendered(&put_request_pipeline("r1", "carol", "{}".to_string(), TTL));
        assert_eq!(
            cmds,
            [
                vec!["HSET", "room_requests:r1", "carol", "{}"],
                vec!["EXPIRE", "room_requests:r1", "21600"],
            ]
        );
    }

    #[test]
    fn test_delete_paths_clean_user_sets() {
        let cmds = rendered(&delete_participant_pipeline("r1", "bob"));
        assert_eq!(
            cmds,
            [
                vec!["HDEL", "room_participants:r1", "bob"],
                vec!["SREM", "user_rooms:bob", "r1"],
            ]
        );

        let members = vec!["alice".to_string(), "bob".to_string()];
        let cmds = rendered(&delete_room_pipeline("r1", &members));
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], ["SREM", "user_rooms:alice", "r1"]);
        assert_eq!(cmds[1], ["SREM", "user_rooms:bob", "r1"]);
        assert_eq!(
            cmds[2],
            ["DEL", "room:r1", "room_participants:r1", "room_requests:r1"]
        );
    }

    #[test]
    fn test_ttl_never_rounds_to_zero() {
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(u64::MAX)), i64::MAX);
    }

    #[test]
    fn test_client_open_rejects_bad_url() {
        assert!(Client::open("not-a-url").is_err());
    }
}
