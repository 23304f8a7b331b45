//! Room Controller
//!
//! Entry point for the Parley room service. Serves the JSON API, the
//! WebSocket signaling route and the operational endpoints on one listener.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use anyhow::Context;
use common::secret::ExposeSecret;
use room_controller::actors::ActorMetrics;
use room_controller::config::Config;
use room_controller::coordinator::RoomCoordinator;
use room_controller::http::{build_routes, AppState};
use room_controller::observability::{init_metrics_recorder, HealthState};
use room_controller::session::{MemorySessionGateway, RedisSessionGateway, SessionGateway};
use room_controller::store::{MemoryRoomStore, RedisRoomStore, RoomStore};
use room_controller::tasks::{
    start_liveness_sweep, start_room_expiry, LivenessConfig, RoomExpiryConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        redis = config.redis_url.is_some(),
        room_inactivity_ttl_seconds = config.room_inactivity_ttl_seconds,
        idle_timeout_seconds = config.idle_timeout_seconds,
        max_rooms = config.max_rooms,
        "Configuration loaded successfully"
    );

    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;

    let health_state = Arc::new(HealthState::new());

    let (store, sessions): (Arc<dyn RoomStore>, Arc<dyn SessionGateway>) =
        if let Some(redis_url) = &config.redis_url {
            info!("Connecting to Redis...");
            let store = RedisRoomStore::connect(
                redis_url.expose_secret(),
                config.room_policy().inactivity_ttl,
            )
            .await
            .context("failed to connect to Redis")?;
            let sessions: Arc<dyn SessionGateway> = Arc::new(RedisSessionGateway::new(
                store.connection(),
                config.session_ttl(),
            ));
            info!("Redis connection established");
            let store: Arc<dyn RoomStore> = Arc::new(store);
            (store, sessions)
        } else {
            warn!("REDIS_URL not set, using in-process stores; state is lost on restart");
            let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
            let sessions: Arc<dyn SessionGateway> =
                Arc::new(MemorySessionGateway::new(config.session_ttl()));
            (store, sessions)
        };

    info!("Initializing actor system...");
    let coordinator = RoomCoordinator::new(
        store,
        config.room_policy(),
        config.max_rooms,
        ActorMetrics::new(),
    );
    info!("Actor system initialized");

    let shutdown_token = CancellationToken::new();

    let expiry_task = tokio::spawn(start_room_expiry(
        coordinator.clone(),
        RoomExpiryConfig::from_config(&config),
        shutdown_token.child_token(),
    ));
    let liveness_task = tokio::spawn(start_liveness_sweep(
        coordinator.clone(),
        LivenessConfig::from_config(&config),
        shutdown_token.child_token(),
    ));
    info!("Background tasks started");

    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        sessions,
    });
    let app = build_routes(state, Arc::clone(&health_state), prometheus_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        anyhow::anyhow!("invalid bind address {}: {e}", config.bind_address)
    })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    health_state.mark_serving();
    info!(addr = %addr, "Room Controller listening");

    // WebSocket connections only end once the actor system closes them, so
    // the drain runs inside the shutdown future
    let drain_health = Arc::clone(&health_state);
    let drain_token = shutdown_token.clone();
    let drain_coordinator = coordinator;
    let shutdown_timeout = config.shutdown_timeout();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            drain_health.mark_draining();
            drain_token.cancel();
            if let Err(e) = drain_coordinator.shutdown(shutdown_timeout).await {
                warn!(error = %e, "Actor system shutdown error");
            }
        })
        .await
        .context("server failed")?;

    info!("Listener closed, waiting for background tasks...");
    for task in [expiry_task, liveness_task] {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
