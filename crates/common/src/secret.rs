//! Secret types for values that must never show up in logs.
//!
//! Re-exports [`secrecy`] types. `SecretString` implements `Debug` with
//! redaction, so structs deriving `Debug` stay safe to log, and the value is
//! zeroized on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     endpoint_name: String,
//!     url: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     endpoint_name: "primary".to_string(),
//!     url: SecretString::from("redis://:hunter2@cache:6379"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("hunter2"));
//! assert!(settings.url.expose_secret().starts_with("redis://"));
//! ```
//!
//! Use `SecretString` for store URLs carrying credentials and for session
//! tokens held outside the session gateway.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Mask a session token for logging, keeping only a short prefix.
#[must_use]
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…")
}
