//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default room inactivity window before expiry (6 hours).
pub const DEFAULT_ROOM_INACTIVITY_TTL_SECONDS: u64 = 21_600;

/// Default retention for rejected join requests.
pub const DEFAULT_REJECTED_REQUEST_TTL_SECONDS: u64 = 300;

/// Default interval between room expiry sweeps.
pub const DEFAULT_ROOM_EXPIRY_INTERVAL_SECONDS: u64 = 3_600;

/// Default interval between connection liveness sweeps.
pub const DEFAULT_LIVENESS_INTERVAL_SECONDS: u64 = 60;

/// Default idle window after which a silent connection is evicted.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 120;

/// Default session lifetime (24 hours).
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 86_400;

/// Default maximum number of live rooms.
pub const DEFAULT_MAX_ROOMS: usize = 10_000;

/// Default upper bound for a room's `max_participants`.
pub const DEFAULT_MAX_ROOM_CAPACITY: u32 = 100;

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

/// Room Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL. When absent, in-process stores are used.
    pub redis_url: Option<SecretString>,

    /// HTTP/WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Inactivity window after which a room expires (default: 6h).
    pub room_inactivity_ttl_seconds: u64,

    /// How long rejected join requests stay queryable (default: 300).
    pub rejected_request_ttl_seconds: u64,

    /// Interval between expiry sweeps (default: 3600).
    pub room_expiry_interval_seconds: u64,

    /// Interval between liveness sweeps (default: 60).
    pub liveness_interval_seconds: u64,

    /// Idle window before a connection is evicted (default: 120).
    pub idle_timeout_seconds: u64,

    /// Session token lifetime (default: 24h).
    pub session_ttl_seconds: u64,

    /// Maximum number of live rooms.
    pub max_rooms: usize,

    /// Upper bound accepted for a room's `max_participants`.
    pub max_room_capacity: u32,

    /// Graceful shutdown timeout.
    pub shutdown_timeout_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field(
                "room_inactivity_ttl_seconds",
                &self.room_inactivity_ttl_seconds,
            )
            .field(
                "rejected_request_ttl_seconds",
                &self.rejected_request_ttl_seconds,
            )
            .field(
                "room_expiry_interval_seconds",
                &self.room_expiry_interval_seconds,
            )
            .field("liveness_interval_seconds", &self.liveness_interval_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("max_rooms", &self.max_rooms)
            .field("max_room_capacity", &self.max_room_capacity)
            .field("shutdown_timeout_seconds", &self.shutdown_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Per-room policy handed to every room actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomPolicy {
    /// Store TTL and expiry window for an idle room.
    pub inactivity_ttl: Duration,
    /// Retention of rejected join requests.
    pub rejected_request_ttl: Duration,
    /// Upper bound for `max_participants`.
    pub max_room_capacity: u32,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            inactivity_ttl: Duration::from_secs(DEFAULT_ROOM_INACTIVITY_TTL_SECONDS),
            rejected_request_ttl: Duration::from_secs(DEFAULT_REJECTED_REQUEST_TTL_SECONDS),
            max_room_capacity: DEFAULT_MAX_ROOM_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = vars
            .get("REDIS_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let bind_address = vars
            .get("RC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let room_inactivity_ttl_seconds = parse_var(
            vars,
            "RC_ROOM_INACTIVITY_TTL_SECONDS",
            DEFAULT_ROOM_INACTIVITY_TTL_SECONDS,
        )?;
        let rejected_request_ttl_seconds = parse_var(
            vars,
            "RC_REJECTED_REQUEST_TTL_SECONDS",
            DEFAULT_REJECTED_REQUEST_TTL_SECONDS,
        )?;
        let room_expiry_interval_seconds = parse_var(
            vars,
            "RC_ROOM_EXPIRY_INTERVAL_SECONDS",
            DEFAULT_ROOM_EXPIRY_INTERVAL_SECONDS,
        )?;
        let liveness_interval_seconds = parse_var(
            vars,
            "RC_LIVENESS_INTERVAL_SECONDS",
            DEFAULT_LIVENESS_INTERVAL_SECONDS,
        )?;
        let idle_timeout_seconds =
            parse_var(vars, "RC_IDLE_TIMEOUT_SECONDS", DEFAULT_IDLE_TIMEOUT_SECONDS)?;
        let session_ttl_seconds =
            parse_var(vars, "RC_SESSION_TTL_SECONDS", DEFAULT_SESSION_TTL_SECONDS)?;
        let max_rooms = parse_var(vars, "RC_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let max_room_capacity =
            parse_var(vars, "RC_MAX_ROOM_CAPACITY", DEFAULT_MAX_ROOM_CAPACITY)?;
        let shutdown_timeout_seconds = parse_var(
            vars,
            "RC_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?;

        for (name, value) in [
            ("RC_ROOM_INACTIVITY_TTL_SECONDS", room_inactivity_ttl_seconds),
            ("RC_ROOM_EXPIRY_INTERVAL_SECONDS", room_expiry_interval_seconds),
            ("RC_LIVENESS_INTERVAL_SECONDS", liveness_interval_seconds),
            ("RC_SESSION_TTL_SECONDS", session_ttl_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if idle_timeout_seconds <= liveness_interval_seconds {
            return Err(ConfigError::InvalidValue(format!(
                "RC_IDLE_TIMEOUT_SECONDS ({idle_timeout_seconds}) must exceed \
                 RC_LIVENESS_INTERVAL_SECONDS ({liveness_interval_seconds})"
            )));
        }

        if max_rooms == 0 || max_room_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RC_MAX_ROOMS and RC_MAX_ROOM_CAPACITY must be > 0".to_string(),
            ));
        }

        Ok(Config {
            redis_url,
            bind_address,
            room_inactivity_ttl_seconds,
            rejected_request_ttl_seconds,
            room_expiry_interval_seconds,
            liveness_interval_seconds,
            idle_timeout_seconds,
            session_ttl_seconds,
            max_rooms,
            max_room_capacity,
            shutdown_timeout_seconds,
        })
    }

    /// Policy applied to every room actor.
    #[must_use]
    pub fn room_policy(&self) -> RoomPolicy {
        RoomPolicy {
            inactivity_ttl: Duration::from_secs(self.room_inactivity_ttl_seconds),
            rejected_request_ttl: Duration::from_secs(self.rejected_request_ttl_seconds),
            max_room_capacity: self.max_room_capacity,
        }
    }

    /// Session token lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    /// Graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([("REDIS_URL".to_string(), "redis://localhost:6379".to_string())])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert!(config.redis_url.is_none());
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.room_inactivity_ttl_seconds, 21_600);
        assert_eq!(config.rejected_request_ttl_seconds, 300);
        assert_eq!(config.room_expiry_interval_seconds, 3_600);
        assert_eq!(config.liveness_interval_seconds, 60);
        assert_eq!(config.idle_timeout_seconds, 120);
        assert_eq!(config.session_ttl_seconds, 86_400);
        assert_eq!(config.max_rooms, DEFAULT_MAX_ROOMS);
        assert_eq!(config.max_room_capacity, DEFAULT_MAX_ROOM_CAPACITY);
    }

    #[test]
    fn test_from_vars_with_redis_and_overrides() {
        let mut vars = base_vars();
        vars.insert("RC_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("RC_IDLE_TIMEOUT_SECONDS".to_string(), "300".to_string());
        vars.insert("RC_MAX_ROOM_CAPACITY".to_string(), "25".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert!(config.redis_url.is_some());
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.idle_timeout_seconds, 300);
        assert_eq!(config.room_policy().max_room_capacity, 25);
    }

    #[test]
    fn test_blank_redis_url_means_in_memory() {
        let vars = HashMap::from([("REDIS_URL".to_string(), "  ".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut vars = base_vars();
        vars.insert("RC_MAX_ROOMS".to_string(), "lots".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("RC_MAX_ROOMS")));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut vars = base_vars();
        vars.insert("RC_ROOM_EXPIRY_INTERVAL_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_idle_timeout_must_exceed_liveness_interval() {
        let mut vars = base_vars();
        vars.insert("RC_LIVENESS_INTERVAL_SECONDS".to_string(), "60".to_string());
        vars.insert("RC_IDLE_TIMEOUT_SECONDS".to_string(), "60".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_redis_url() {
        let mut vars = base_vars();
        vars.insert(
            "REDIS_URL".to_string(),
            "redis://:supersecret@cache:6379".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_room_policy_durations() {
        let policy = Config::from_vars(&HashMap::new()).unwrap().room_policy();
        assert_eq!(policy.inactivity_ttl, Duration::from_secs(21_600));
        assert_eq!(policy.rejected_request_ttl, Duration::from_secs(300));
    }
}
