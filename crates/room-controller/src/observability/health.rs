//! Health endpoints for the Room Controller.
//!
//! - `GET /health` - 200 while the process is up
//! - `GET /ready` - 200 only in the [`Phase::Serving`] phase, 503 otherwise
//!
//! Both return `{"phase": ...}` so an operator can tell a booting instance
//! from a draining one. `/metrics` is mounted separately by the HTTP router.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Process lifecycle as seen by load balancers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Listener not bound yet.
    Starting = 0,
    Serving = 1,
    /// Shutdown began; room actors are closing their sockets.
    Draining = 2,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Serving,
            2 => Self::Draining,
            _ => Self::Starting,
        }
    }
}

#[derive(Debug, Serialize)]
struct PhaseBody {
    phase: Phase,
}

/// Shared lifecycle phase.
#[derive(Debug, Default)]
pub struct HealthState {
    phase: AtomicU8,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener is bound; accept traffic.
    pub fn mark_serving(&self) {
        // A draining process never returns to serving
        let _ = self.phase.compare_exchange(
            Phase::Starting as u8,
            Phase::Serving as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn mark_draining(&self) {
        self.phase.store(Phase::Draining as u8, Ordering::SeqCst);
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Serving
    }
}

/// Router exposing `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .with_state(health_state)
}

async fn liveness(State(state): State<Arc<HealthState>>) -> Json<PhaseBody> {
    Json(PhaseBody {
        phase: state.phase(),
    })
}

async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<PhaseBody>) {
    let status = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(PhaseBody {
            phase: state.phase(),
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    #[test]
    fn test_phase_transitions() {
        let state = HealthState::new();
        assert_eq!(state.phase(), Phase::Starting);
        assert!(!state.is_ready());

        state.mark_serving();
        assert!(state.is_ready());

        state.mark_draining();
        assert_eq!(state.phase(), Phase::Draining);
        state.mark_serving();
        assert_eq!(state.phase(), Phase::Draining);
    }

    async fn fetch(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_endpoints_follow_phase() {
        let state = Arc::new(HealthState::new());
        let app = health_router(Arc::clone(&state));

        let (status, body) = fetch(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "starting");
        let (status, _) = fetch(&app, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.mark_serving();
        let (status, body) = fetch(&app, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "serving");

        state.mark_draining();
        let (status, body) = fetch(&app, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["phase"], "draining");
        let (status, _) = fetch(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }
}
