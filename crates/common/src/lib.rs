//! Types shared across Parley components.

#![warn(clippy::pedantic)]

/// Room and caller identifiers
pub mod types;

/// Secret types that prevent accidental logging
pub mod secret;
