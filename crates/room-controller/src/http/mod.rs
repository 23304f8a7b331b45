//! HTTP and WebSocket boundary for the Room Controller.
//!
//! Defines the Axum router and application state. Handlers translate JSON
//! bodies into coordinator calls; the WebSocket route hands each socket to
//! a [`SignalRelay`](crate::relay::SignalRelay).

pub mod auth;
pub mod handlers;
pub mod ws;

use crate::coordinator::RoomCoordinator;
use crate::observability::{health_router, HealthState};
use crate::session::SessionGateway;
use axum::{
    extract::State,
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for the JSON API.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Room coordination facade.
    pub coordinator: RoomCoordinator,

    /// Token-to-identity resolution.
    pub sessions: Arc<dyn SessionGateway>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready` - probes backed by `health`
/// - `/metrics` - Prometheus text exposition
/// - `/api/session` - issue a session (public)
/// - `/api/rooms`, `/api/rooms/:room_id` - room listing and state (public)
/// - `/api/rooms/:room_id/*`, `/api/user/rooms` - bearer session required
/// - `/ws/:room_id` - WebSocket upgrade, token in the query string
///
/// `TraceLayer` wraps everything. The 30 second timeout applies to the API
/// routes only, since WebSocket connections are long-lived.
pub fn build_routes(
    state: Arc<AppState>,
    health: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    // Public routes (no session required)
    let public_routes = Router::new()
        .route("/api/session", post(handlers::create_session))
        .route("/api/rooms", get(handlers::list_rooms))
        .route("/api/rooms/:room_id", get(handlers::get_room))
        .with_state(state.clone());

    // Protected routes (bearer session required)
    let protected_routes = Router::new()
        .route("/api/rooms", post(handlers::create_room))
        .route("/api/rooms/:room_id", delete(handlers::delete_room))
        .route("/api/rooms/:room_id/join", post(handlers::join_room))
        .route("/api/rooms/:room_id/approve", post(handlers::approve_request))
        .route("/api/rooms/:room_id/reject", post(handlers::reject_request))
        .route("/api/rooms/:room_id/leave", post(handlers::leave_room))
        .route("/api/rooms/:room_id/requests", get(handlers::list_requests))
        .route(
            "/api/rooms/:room_id/requests/:user_id",
            get(handlers::request_status),
        )
        .route("/api/user/rooms", get(handlers::user_rooms))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ))
        .with_state(state.clone());

    let api_routes = public_routes
        .merge(protected_routes)
        .layer(TimeoutLayer::new(API_TIMEOUT));

    let ws_routes = Router::new()
        .route("/ws/:room_id", get(ws::upgrade))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        .merge(health_router(health))
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        // Axum shares state by cloning the Arc; AppState itself must be Clone
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_api_timeout() {
        assert_eq!(API_TIMEOUT, Duration::from_secs(30));
    }
}
