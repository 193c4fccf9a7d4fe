// ============================================
// File: crates/otr-core/src/session/mod.rs
// ============================================
//! # Session Module
//!
//! Post-AKE state: DH key generations and session keys
//! ([`key_management`]) and the authenticated encryption of data messages
//! ([`data_message`]).

pub mod data_message;
pub mod key_management;

pub use data_message::{DataMessageCodec, DecryptedMessage};
pub use key_management::KeyManagementContext;
