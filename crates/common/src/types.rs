//! Identifiers shared by the room controller and its tooling.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of a generated room id.
pub const ROOM_ID_LEN: usize = 8;

/// Short opaque room identifier.
///
/// Generated ids are the first eight hex characters of a random UUID. They
/// are short enough to read aloud, so callers must check for collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Generate a fresh random room id.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(ROOM_ID_LEN);
        Self(id)
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the id, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable caller identity resolved from a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id, unique per session.
    pub user_id: String,
    /// Display name chosen at session creation.
    pub display_name: String,
}

impl Identity {
    /// Create an identity from its parts.
    #[must_use]
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Create an identity with a random user id.
    #[must_use]
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), display_name)
    }
}

/// Current wall-clock time as unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_generate_is_short_hex() {
        let id = RoomId::generate();
        assert_eq!(id.as_str().len(), ROOM_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_room_id_generate_differs() {
        let a = RoomId::generate();
        let b = RoomId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_room_id_serializes_as_plain_string() {
        let id = RoomId::from("abcd1234");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abcd1234\"");
    }

    #[test]
    fn test_identity_generate_unique_ids() {
        let a = Identity::generate("Alice");
        let b = Identity::generate("Alice");
        assert_ne!(a.user_id, b.user_id);
        assert_eq!(a.display_name, "Alice");
    }
}
