// ============================================
// File: crates/otr-common/src/lib.rs
// ============================================
//! # OTR Common - Shared Leaf Types
//!
//! ## Creation Reason
//! Provides the small value types shared by the protocol core and the
//! conversation layer, so neither has to depend on the other for them.
//!
//! ## Main Functionality
//! - [`types`]: `InstanceTag`, `Fingerprint`, `Ssid`, `SecretBytes`
//! - [`time`]: heartbeat scheduling
//! - [`error`]: `CommonError` and the crate `Result` alias
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              otr-conversation                       │
//! │                    │                                │
//! │                    ▼                                │
//! │               otr-core                              │
//! │                    │                                │
//! │                    ▼                                │
//! │              otr-common  ◄── You are here           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Keep this crate free of protocol logic
//! - Anything holding secret bytes goes through `SecretBytes`
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

pub use error::{CommonError, Result};
pub use time::Heartbeat;
pub use types::{Fingerprint, InstanceTag, SecretBytes, Ssid};
