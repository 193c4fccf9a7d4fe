// ============================================
// File: crates/otr-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the OTR binary wire protocol: message types, the common header,
//! MPI/DATA framing and the TLV records carried inside data messages.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`messages`]: Message structures
//! - [`codec`]: Binary serialization/deserialization
//! - [`tlv`]: TLV records and plaintext framing
//! - [`version`]: Protocol versioning
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    AKE Phase                                │
//! │                                                             │
//! │  Alice ─────────── DH-Commit ──────────────────────► Bob    │
//! │  Alice ◄────────── DH-Key ──────────────────────────  Bob   │
//! │  Alice ─────────── Reveal-Signature ────────────────► Bob   │
//! │  Alice ◄────────── Signature ───────────────────────  Bob   │
//! │                                                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Data Phase                               │
//! │                                                             │
//! │  Alice ══════ Data (AES-CTR + HMAC-SHA1, TLVs) ═══════ Bob  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Big-endian byte order for multi-byte integers
//! - MPI: u32 length followed by minimal big-endian magnitude
//! - DATA: u32 length followed by raw bytes
//!
//! ## ⚠️ Important Note for Next Developer
//! - MACs cover the encoded header; re-encoding must be byte-exact
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod messages;
pub mod tlv;
pub mod version;

// Re-export primary types
pub use codec::{decode_message, encode_message, Codec, ProtocolCodec};
pub use messages::{
    DataMessage, DhCommit, DhKey, MessageBody, MessageHeader, MessageType, OtrMessage,
    RevealSignature, Signature, FLAG_IGNORE_UNREADABLE,
};
pub use tlv::{Plaintext, Tlv, TlvType};
pub use version::{ProtocolVersion, CURRENT_PROTOCOL_VERSION};
