//! Session middleware for protected routes.
//!
//! Extracts the bearer token from the `Authorization` header, resolves it
//! through the session gateway, and injects the caller's [`Identity`] into
//! request extensions for downstream handlers.

use crate::errors::RcError;
use crate::http::AppState;
use crate::session::{authenticate, bearer_token};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

#[cfg(doc)]
use common::types::Identity;

fn extract_bearer_token(req: &Request) -> Result<&str, RcError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "rc.http.auth", "Missing Authorization header");
            RcError::Unauthorized("missing Authorization header".to_string())
        })?;

    bearer_token(header).ok_or_else(|| {
        tracing::debug!(target: "rc.http.auth", "Invalid Authorization header format");
        RcError::Unauthorized("invalid Authorization header format".to_string())
    })
}

/// Require a live session.
///
/// # Response
///
/// - Returns 401 Unauthorized if the token is missing, unknown or expired
/// - Continues to the next handler with `Identity` in extensions otherwise
#[instrument(skip_all, name = "rc.http.auth")]
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, RcError> {
    let token = extract_bearer_token(&req)?;
    let identity = authenticate(state.sessions.as_ref(), Some(token)).await?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
