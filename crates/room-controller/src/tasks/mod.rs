//! Background tasks.
//!
//! Each task loops on an interval until its cancellation token fires. The
//! single-pass `run_*` functions are public so tests can drive them
//! directly. Failures are logged and retried on the next tick.

pub mod liveness;
pub mod room_expiry;

pub use liveness::{run_liveness_sweep, start_liveness_sweep, LivenessConfig};
pub use room_expiry::{run_room_expiry, start_room_expiry, RoomExpiryConfig};
