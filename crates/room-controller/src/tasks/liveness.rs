//! Connection liveness background task.
//!
//! Each pass probes every live connection and evicts those with no inbound
//! activity inside the idle window. Evicted members go through the normal
//! disconnect path, so the rest of their room sees `user_left`.

use crate::config::{Config, DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_LIVENESS_INTERVAL_SECONDS};
use crate::coordinator::RoomCoordinator;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Configuration for the liveness task.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Probe interval in seconds.
    pub check_interval_seconds: u64,
    /// Silence after which a connection is evicted.
    pub idle_timeout_seconds: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: DEFAULT_LIVENESS_INTERVAL_SECONDS,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
        }
    }
}

impl LivenessConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval_seconds: config.liveness_interval_seconds,
            idle_timeout_seconds: config.idle_timeout_seconds,
        }
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

/// Start the liveness task. Returns when `cancel_token` is cancelled.
#[instrument(skip_all, name = "rc.task.liveness")]
pub async fn start_liveness_sweep(
    coordinator: RoomCoordinator,
    config: LivenessConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "rc.task.liveness",
        check_interval_seconds = config.check_interval_seconds,
        idle_timeout_seconds = config.idle_timeout_seconds,
        "Starting liveness task"
    );

    let period = Duration::from_secs(config.check_interval_seconds.max(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_liveness_sweep(&coordinator, &config).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "rc.task.liveness",
                    "Liveness task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "rc.task.liveness", "Liveness task stopped");
}

/// Run a single liveness pass. Returns the number of evicted connections.
pub async fn run_liveness_sweep(coordinator: &RoomCoordinator, config: &LivenessConfig) -> usize {
    match coordinator
        .sweep_idle_connections(config.idle_timeout())
        .await
    {
        Ok(evicted) => {
            if evicted > 0 {
                debug!(
                    target: "rc.task.liveness",
                    evicted,
                    "Evicted idle connections"
                );
            }
            evicted
        }
        Err(e) => {
            error!(
                target: "rc.task.liveness",
                error = %e,
                "Liveness pass failed"
            );
            0
        }
    }
}
