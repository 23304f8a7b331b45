//! Actor model for the room controller.
//!
//! ```text
//! RoomControllerActor (singleton)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room)
//!         ├── owns room state, participants and join requests
//!         ├── owns the room's ConnectionHub
//!         └── queues persistence on a StoreWriter
//! ```
//!
//! Every mutation of one room runs inside its `RoomActor`, which gives
//! per-room mutual exclusion without locks. Different rooms proceed in
//! parallel.
//!
//! # Modules
//!
//! - [`controller`] - `RoomControllerActor` singleton that supervises rooms
//! - [`room`] - `RoomActor` per live room
//! - [`hub`] - per-room connection registry and fan-out
//! - [`connection`] - connection handles and the socket writer task
//! - [`messages`] - message and result types
//! - [`metrics`] - mailbox monitoring and actor counters

pub mod connection;
pub mod controller;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod room;

pub use connection::{spawn_writer, ConnectionHandle, DeliveryFailure, Outbound};
pub use controller::{ControllerSettings, RoomControllerActor, RoomControllerHandle};
pub use hub::{ConnectionHub, Delivery, Lane, SweepOutcome};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use room::{RoomActor, RoomActorHandle, RoomSeed};
