// ============================================
// File: crates/otr-conversation/src/lib.rs
// ============================================
//! # OTR Conversation - Send/Receive Surface
//!
//! ## Creation Reason
//! Ties the protocol core's state machines into one per-peer aggregate
//! with a policy, an event sink and a two-call API.
//!
//! ## Main Functionality
//! - [`conversation`]: `Conversation`, `MessageState`, `Received`
//! - [`config`]: `ConversationConfig` loaded from TOML
//! - [`events`]: `EventHandler` and the events it receives
//! - [`shared`]: `SharedConversation`, the mutex-guarded handle
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              otr-conversation  ◄── You are here     │
//! │                    │                                │
//! │                    ▼                                │
//! │               otr-core                              │
//! │                    │                                │
//! │                    ▼                                │
//! │              otr-common                             │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! wire bytes ─► decode ─► header checks ─┬─► AKE ─► keys installed
//!                                        └─► data message ─► TLVs ─► SMP
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - No network I/O lives here; callers move the returned bytes
//! - Never install a tracing subscriber from library code
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod shared;

pub use config::{ConversationConfig, PolicyConfig};
pub use conversation::{Conversation, MessageState, Received};
pub use error::{ConversationError, Result};
pub use events::{
    Event, EventHandler, MessageEvent, NoopEventHandler, RecordingEventHandler, SecurityEvent,
    SmpEvent,
};
pub use shared::SharedConversation;
