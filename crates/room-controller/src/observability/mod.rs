//! Observability for the Room Controller.
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit safe fields.
//! Metric labels are bounded:
//! - `actor_type`: controller, room
//! - `operation`: store operations
//! - `outcome`: join outcomes
//! - `kind`: relayed frame kinds
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_rooms_active` | Gauge | none | Live room actors |
//! | `rc_connections_active` | Gauge | none | Registered WebSocket connections |
//! | `rc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `rc_join_outcomes_total` | Counter | `outcome` | Join results |
//! | `rc_signals_relayed_total` | Counter | `kind` | Inbound frames routed |
//! | `rc_deliveries_evicted_total` | Counter | none | Connections evicted on failed delivery |
//! | `rc_rooms_expired_total` | Counter | none | Rooms removed by the expiry sweep |
//! | `rc_store_operation_duration_seconds` | Histogram | `operation` | Store latency |
//! | `rc_store_errors_total` | Counter | `operation` | Failed store operations |
//! | `rc_actor_panics_total` | Counter | `actor_type` | Actor panics (bugs) |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, Phase};
pub use metrics::init_metrics_recorder;
