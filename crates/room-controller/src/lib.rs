//! Room Controller (RC) Service Library
//!
//! Room coordination and connection fan-out for Parley voice rooms:
//!
//! - Room lifecycle: create, join, waiting-room approval, leave, delete, expiry
//! - Per-room connection registry with ordered broadcast and unicast
//! - WebSocket signal relay for WebRTC negotiation and passthrough frames
//! - Write-behind persistence to Redis, or in-process for single-node use
//!
//! # Architecture
//!
//! ```text
//! axum router ──► RoomCoordinator ──► RoomControllerActor
//!                                      └── RoomActor (one per live room)
//!                                           ├── ConnectionHub
//!                                           └── StoreWriter ──► RoomStore
//! WebSocket ──► SignalRelay ──► RoomActor
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Actor hierarchy, connection hub and message types
//! - [`coordinator`] - Public room coordination facade
//! - [`relay`] - Per-connection inbound frame dispatch
//! - [`http`] - JSON API and WebSocket upgrade
//! - [`session`] - Session token resolution
//! - [`store`] - Room persistence (memory and Redis)
//! - [`tasks`] - Room expiry and connection liveness sweeps
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP status and close code mapping

pub mod actors;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod http;
pub mod observability;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod store;
pub mod tasks;
