//! Room expiry background task.
//!
//! Periodically asks the coordinator to expire rooms with no activity
//! inside the inactivity window. Rooms that still hold live member
//! connections are refreshed instead of expired.

use crate::config::{Config, DEFAULT_ROOM_EXPIRY_INTERVAL_SECONDS};
use crate::coordinator::RoomCoordinator;
use common::types::unix_now;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Configuration for the room expiry task.
#[derive(Debug, Clone)]
pub struct RoomExpiryConfig {
    /// Sweep interval in seconds.
    pub check_interval_seconds: u64,
}

impl Default for RoomExpiryConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: DEFAULT_ROOM_EXPIRY_INTERVAL_SECONDS,
        }
    }
}

impl RoomExpiryConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval_seconds: config.room_expiry_interval_seconds,
        }
    }
}

/// Start the room expiry task. Returns when `cancel_token` is cancelled.
#[instrument(skip_all, name = "rc.task.expiry")]
pub async fn start_room_expiry(
    coordinator: RoomCoordinator,
    config: RoomExpiryConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "rc.task.expiry",
        check_interval_seconds = config.check_interval_seconds,
        "Starting room expiry task"
    );

    let period = Duration::from_secs(config.check_interval_seconds.max(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_room_expiry(&coordinator, unix_now()).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "rc.task.expiry",
                    "Room expiry task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "rc.task.expiry", "Room expiry task stopped");
}

/// Run a single expiry pass as of `now` (unix seconds).
///
/// Returns the number of rooms expired.
pub async fn run_room_expiry(coordinator: &RoomCoordinator, now: i64) -> usize {
    match coordinator.expire_rooms(now).await {
        Ok(expired) => expired.len(),
        Err(e) => {
            error!(
                target: "rc.task.expiry",
                error = %e,
                "Room expiry pass failed"
            );
            0
        }
    }
}
