// ============================================
// File: crates/otr-core/src/protocol/messages.rs
// ============================================
//! # Protocol Message Definitions
//!
//! ## Creation Reason
//! Defines the structure of the binary OTR messages: the four AKE messages
//! and the data message.
//!
//! ## Main Functionality
//! - `MessageType`: type byte of each message
//! - `MessageHeader`: version, type and (v3) instance tags
//! - `DhCommit`, `DhKey`, `RevealSignature`, `Signature`: AKE bodies
//! - `DataMessage`: encrypted application payload
//! - `OtrMessage`: header plus one body
//!
//! ## Wire Format (Big Endian)
//! | Message | Fields after the header |
//! |---------|-------------------------|
//! | DH-Commit | DATA encrypted g^x, DATA hashed g^x |
//! | DH-Key | MPI g^y |
//! | Reveal-Signature | DATA r, DATA encrypted sig, MAC(20) |
//! | Signature | DATA encrypted sig, MAC(20) |
//! | Data | flags, sender keyid, recipient keyid, MPI next DH, ctr(8), DATA msg, MAC(20), DATA old MAC keys |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field order is fixed by the protocol; DO NOT reorder
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use otr_common::types::InstanceTag;

use super::version::ProtocolVersion;
use crate::crypto::{COMMIT_NONCE_SIZE, CTR_SIZE, MAC_SIZE, SHA256_SIZE};

// ============================================
// Constants
// ============================================

/// Data message flag: the receiver should not report it if unreadable.
pub const FLAG_IGNORE_UNREADABLE: u8 = 0x01;

// ============================================
// MessageType
// ============================================

/// OTR message type identifier.
///
/// # Values
/// | Value | Type |
/// |-------|------|
/// | 0x02 | DH-Commit |
/// | 0x03 | Data |
/// | 0x0a | DH-Key |
/// | 0x11 | Reveal-Signature |
/// | 0x12 | Signature |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// First AKE message: commitment to g^x.
    DhCommit = 0x02,
    /// Encrypted data message.
    Data = 0x03,
    /// Second AKE message: g^y in the clear.
    DhKey = 0x0a,
    /// Third AKE message: reveals r and carries a signature.
    RevealSignature = 0x11,
    /// Fourth AKE message: the responder's signature.
    Signature = 0x12,
}

impl MessageType {
    /// Converts a byte to a `MessageType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(Self::DhCommit),
            0x03 => Some(Self::Data),
            0x0a => Some(Self::DhKey),
            0x11 => Some(Self::RevealSignature),
            0x12 => Some(Self::Signature),
            _ => None,
        }
    }

    /// Converts the `MessageType` to its byte representation.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Checks if this is an AKE message.
    #[must_use]
    pub const fn is_ake(&self) -> bool {
        !matches!(self, Self::Data)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_byte(value).ok_or(value)
    }
}

impl From<MessageType> for u8 {
    fn from(msg_type: MessageType) -> Self {
        msg_type.as_byte()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DhCommit => "DH-Commit",
            Self::Data => "Data",
            Self::DhKey => "DH-Key",
            Self::RevealSignature => "Reveal-Signature",
            Self::Signature => "Signature",
        };
        f.write_str(name)
    }
}

// ============================================
// MessageHeader
// ============================================

/// The common header preceding every message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol version.
    pub version: ProtocolVersion,
    /// Message type.
    pub message_type: MessageType,
    /// Sender instance tag (zero under v2).
    pub sender_tag: InstanceTag,
    /// Receiver instance tag (zero under v2, or when not yet known).
    pub receiver_tag: InstanceTag,
}

impl MessageHeader {
    /// Creates a header.
    #[must_use]
    pub const fn new(
        version: ProtocolVersion,
        message_type: MessageType,
        sender_tag: InstanceTag,
        receiver_tag: InstanceTag,
    ) -> Self {
        Self {
            version,
            message_type,
            sender_tag,
            receiver_tag,
        }
    }
}

// ============================================
// AKE Bodies
// ============================================

/// DH-Commit: `AES-CTR_r(MPI(g^x))` and `SHA256(MPI(g^x))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhCommit {
    /// g^x encrypted under r.
    pub encrypted_gx: Vec<u8>,
    /// SHA-256 of the MPI-encoded g^x.
    pub hashed_gx: [u8; SHA256_SIZE],
}

/// DH-Key: the responder's g^y.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhKey {
    /// g^y.
    pub gy: BigUint,
}

/// Reveal-Signature: reveals r and carries the initiator's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealSignature {
    /// The commitment nonce.
    pub r: [u8; COMMIT_NONCE_SIZE],
    /// `AES-CTR_c(X)`.
    pub encrypted_signature: Vec<u8>,
    /// `HMAC-SHA256-160_m2(DATA(encrypted_signature))`.
    pub mac: [u8; MAC_SIZE],
}

/// Signature: the responder's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// `AES-CTR_c'(X')`.
    pub encrypted_signature: Vec<u8>,
    /// `HMAC-SHA256-160_m2'(DATA(encrypted_signature))`.
    pub mac: [u8; MAC_SIZE],
}

// ============================================
// DataMessage
// ============================================

/// An encrypted data message.
///
/// # Purpose
/// Carries application payload and TLVs, advertises the sender's next DH
/// public value and discloses retired MAC keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// Flag bits (`FLAG_IGNORE_UNREADABLE`).
    pub flags: u8,
    /// Sender's key generation used for this message.
    pub sender_key_id: u32,
    /// Recipient's key generation used for this message.
    pub recipient_key_id: u32,
    /// Sender's newest DH public value.
    pub next_dh: BigUint,
    /// Top half of the AES-CTR initial counter.
    pub top_half_counter: [u8; CTR_SIZE],
    /// AES-CTR ciphertext.
    pub encrypted_message: Vec<u8>,
    /// HMAC-SHA1 over header through `encrypted_message`.
    pub mac: [u8; MAC_SIZE],
    /// Concatenated 20-byte MAC keys being revealed.
    pub old_mac_keys: Vec<u8>,
}

impl DataMessage {
    /// Returns `true` if the sender asked us not to report it as unreadable.
    #[must_use]
    pub const fn ignore_unreadable(&self) -> bool {
        self.flags & FLAG_IGNORE_UNREADABLE != 0
    }

    /// Returns the counter as an integer.
    #[must_use]
    pub const fn counter(&self) -> u64 {
        u64::from_be_bytes(self.top_half_counter)
    }
}

// ============================================
// OtrMessage
// ============================================

/// A message body of any type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// DH-Commit
    DhCommit(DhCommit),
    /// DH-Key
    DhKey(DhKey),
    /// Reveal-Signature
    RevealSignature(RevealSignature),
    /// Signature
    Signature(Signature),
    /// Data
    Data(DataMessage),
}

impl MessageBody {
    /// The type byte matching this body.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::DhCommit(_) => MessageType::DhCommit,
            Self::DhKey(_) => MessageType::DhKey,
            Self::RevealSignature(_) => MessageType::RevealSignature,
            Self::Signature(_) => MessageType::Signature,
            Self::Data(_) => MessageType::Data,
        }
    }
}

/// A complete binary OTR message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtrMessage {
    /// Common header.
    pub header: MessageHeader,
    /// Typed body.
    pub body: MessageBody,
}

impl OtrMessage {
    /// Builds a message, deriving the header's type from the body.
    #[must_use]
    pub const fn new(
        version: ProtocolVersion,
        sender_tag: InstanceTag,
        receiver_tag: InstanceTag,
        body: MessageBody,
    ) -> Self {
        Self {
            header: MessageHeader::new(version, body.message_type(), sender_tag, receiver_tag),
            body,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_bytes() {
        for t in [
            MessageType::DhCommit,
            MessageType::Data,
            MessageType::DhKey,
            MessageType::RevealSignature,
            MessageType::Signature,
        ] {
            assert_eq!(MessageType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(MessageType::try_from(0x01), Err(0x01));
        assert!(MessageType::DhKey.is_ake());
        assert!(!MessageType::Data.is_ake());
    }

    #[test]
    fn test_header_type_follows_body() {
        let msg = OtrMessage::new(
            ProtocolVersion::V3,
            InstanceTag::from_wire(0x100),
            InstanceTag::ZERO,
            MessageBody::DhKey(DhKey {
                gy: BigUint::from(5u32),
            }),
        );
        assert_eq!(msg.header.message_type, MessageType::DhKey);
    }

    #[test]
    fn test_data_message_flags() {
        let msg = DataMessage {
            flags: FLAG_IGNORE_UNREADABLE,
            sender_key_id: 1,
            recipient_key_id: 1,
            next_dh: BigUint::from(2u32),
            top_half_counter: 7u64.to_be_bytes(),
            encrypted_message: Vec::new(),
            mac: [0u8; MAC_SIZE],
            old_mac_keys: Vec::new(),
        };
        assert!(msg.ignore_unreadable());
        assert_eq!(msg.counter(), 7);
    }
}
