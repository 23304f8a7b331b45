//! # RC Test Utilities
//!
//! Shared test utilities for the Room Controller (RC) service.
//!
//! ## Modules
//!
//! - `fixtures` - Room and user builders, coordinator setup
//! - `faulty_store` - Store wrapper that injects failures and counts calls
//! - `connection` - Connection handle plus outbound receiver with assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let coordinator = memory_coordinator();
//!     let alice = TestUser::new("alice");
//!     let created = coordinator
//!         .create_room(&alice.identity(), TestRoom::new("Standup").open().spec())
//!         .await
//!         .unwrap();
//!
//!     let mut conn = TestConnection::new("alice");
//!     coordinator.connect(&created.room_id, conn.handle()).await.unwrap();
//!     assert_eq!(conn.next_event().await["type"], "participants_update");
//! }
//! ```

pub mod connection;
pub mod faulty_store;
pub mod fixtures;

pub use connection::*;
pub use faulty_store::*;
pub use fixtures::*;
