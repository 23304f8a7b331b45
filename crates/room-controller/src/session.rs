//! Session Gateway: resolves opaque bearer tokens to caller identities.
//!
//! Tokens and user ids are independent random UUIDs. A session maps one
//! token to one stable identity for the session TTL.
//!
//! # Key Patterns (Redis)
//!
//! - `session:{token}` - Identity JSON (`EX` session TTL)

use crate::coordinator::validate_display_name;
use crate::errors::RcError;
use async_trait::async_trait;
use common::secret::{mask_token, ExposeSecret, SecretString};
use common::types::Identity;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// A newly issued session.
#[derive(Debug)]
pub struct IssuedSession {
    pub token: SecretString,
    pub identity: Identity,
}

/// Token-to-identity resolution.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Resolve a token, or `None` if unknown or expired.
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, RcError>;

    /// Issue a session for a new identity with the given display name.
    async fn create(&self, display_name: &str) -> Result<IssuedSession, RcError>;
}

fn new_session(display_name: &str) -> Result<(String, Identity), RcError> {
    let name = validate_display_name(display_name)?;
    Ok((Uuid::new_v4().to_string(), Identity::generate(name)))
}

/// In-process session store.
#[derive(Debug)]
pub struct MemorySessionGateway {
    ttl: Duration,
    sessions: RwLock<HashMap<String, (Identity, Instant)>>,
}

impl MemorySessionGateway {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionGateway for MemorySessionGateway {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, RcError> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some((identity, expires_at)) if *expires_at > now => {
                    return Ok(Some(identity.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop it
        self.sessions.write().await.remove(token);
        debug!(target: "rc.session", token = %mask_token(token), "Session expired");
        Ok(None)
    }

    async fn create(&self, display_name: &str) -> Result<IssuedSession, RcError> {
        let (token, identity) = new_session(display_name)?;
        let expires_at = Instant::now() + self.ttl;
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, (_, deadline)| *deadline > Instant::now());
        sessions.insert(token.clone(), (identity.clone(), expires_at));
        Ok(IssuedSession {
            token: SecretString::from(token),
            identity,
        })
    }
}

fn session_key(token: &str) -> String {
    format!("session:{token}")
}

/// Redis-backed session store.
#[derive(Clone)]
pub struct RedisSessionGateway {
    connection: MultiplexedConnection,
    ttl: Duration,
}

impl RedisSessionGateway {
    #[must_use]
    pub fn new(connection: MultiplexedConnection, ttl: Duration) -> Self {
        Self { connection, ttl }
    }
}

#[async_trait]
impl SessionGateway for RedisSessionGateway {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, RcError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(session_key(token)).await.map_err(|e| {
            warn!(target: "rc.session", error = %e, "Session lookup failed");
            RcError::Store(format!("session lookup failed: {e}"))
        })?;
        let Some(json) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(identity) => Ok(Some(identity)),
            Err(e) => {
                warn!(
                    target: "rc.session",
                    token = %mask_token(token),
                    error = %e,
                    "Undecodable session record"
                );
                Ok(None)
            }
        }
    }

    async fn create(&self, display_name: &str) -> Result<IssuedSession, RcError> {
        let (token, identity) = new_session(display_name)?;
        let json = serde_json::to_string(&identity)?;
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(session_key(&token), json, self.ttl.as_secs().max(1))
            .await
            .map_err(|e| {
                warn!(target: "rc.session", error = %e, "Session write failed");
                RcError::Store(format!("session write failed: {e}"))
            })?;
        Ok(IssuedSession {
            token: SecretString::from(token),
            identity,
        })
    }
}

/// Extract the bearer token from an `Authorization` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve a token to an identity, mapping absence to `Unauthorized`.
///
/// # Errors
///
/// Returns `RcError::Unauthorized` for unknown or expired tokens, or the
/// gateway's own error if the lookup fails.
pub async fn authenticate(
    gateway: &dyn SessionGateway,
    token: Option<&str>,
) -> Result<Identity, RcError> {
    let Some(token) = token else {
        return Err(RcError::Unauthorized("missing session token".to_string()));
    };
    gateway
        .resolve(token)
        .await?
        .ok_or_else(|| RcError::Unauthorized("invalid or expired session".to_string()))
}

/// Expose a token for the response body.
#[must_use]
pub fn reveal(token: &SecretString) -> &str {
    token.expose_secret()
}
