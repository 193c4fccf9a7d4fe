// ============================================
// File: crates/otr-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines the errors raised by the protocol core: wire parsing, the AKE,
//! key management, the data message codec and SMP.
//!
//! ## Error Categories
//! 1. **Malformed**: corrupt framing, MPIs or TLVs; reject the one message
//! 2. **Protocol violation**: bad MAC, bad signature, failed proof, value out
//!    of range, message in the wrong state; abort the sub-state machine
//! 3. **Conflict**: stale counter or unknown key id; drop the message
//! 4. **Randomness**: the random source came up short; fatal to the operation
//! 5. **State**: an API call made in the wrong conversation state
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - Every variant must be covered by `kind()`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::fmt;

use thiserror::Error;

use otr_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// ErrorKind
// ============================================

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Corrupt or truncated input.
    Malformed,
    /// Input that parsed but broke the protocol rules.
    ProtocolViolation,
    /// Replay or ordering conflict.
    Conflict,
    /// The random source failed.
    Randomness,
    /// Operation invoked in the wrong state.
    State,
}

/// Which side's key generation an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySide {
    /// Our DH key generations.
    Ours,
    /// The peer's DH key generations.
    Theirs,
}

impl fmt::Display for KeySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ours => write!(f, "our"),
            Self::Theirs => write!(f, "their"),
        }
    }
}

// ============================================
// CoreError
// ============================================

/// Errors produced by the OTR protocol core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    // ========================================
    // Malformed Input
    // ========================================
    /// Message is malformed.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What's wrong with the message
        reason: String,
    },

    /// Message is too short to be valid.
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Message exceeds the configured maximum size.
    #[error("Message too large: max {max} bytes, got {actual}")]
    MessageTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown message type byte.
    #[error("Unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// A TLV record is truncated or its value is corrupt.
    #[error("Malformed TLV: {reason}")]
    MalformedTlv {
        /// What's wrong with the record
        reason: String,
    },

    /// An MPI could not be decoded.
    #[error("Malformed MPI: {reason}")]
    MalformedMpi {
        /// What's wrong with the MPI
        reason: String,
    },

    // ========================================
    // Protocol Violations
    // ========================================
    /// The revealed DH value does not match the earlier commitment.
    #[error("Bad commit MAC: revealed value does not match commitment")]
    InvalidCommitment,

    /// MAC verification failed.
    #[error("MAC verification failed")]
    BadMac,

    /// Signature verification failed.
    #[error("Signature verification failed")]
    BadSignature,

    /// A group element is outside the valid range or subgroup.
    #[error("Invalid group element: {context}")]
    InvalidGroupElement {
        /// Which value was rejected
        context: String,
    },

    /// An exponent is outside `[1, q)`.
    #[error("Invalid exponent: {context}")]
    InvalidExponent {
        /// Which value was rejected
        context: String,
    },

    /// A zero-knowledge proof did not verify.
    #[error("Zero-knowledge proof failed: {proof}")]
    ZkpVerificationFailed {
        /// Which proof failed
        proof: &'static str,
    },

    /// Protocol version not supported.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Message not valid in the current protocol state.
    #[error("Unexpected message: {message} while {state}")]
    UnexpectedMessage {
        /// What arrived
        message: String,
        /// Current state
        state: String,
    },

    /// A key id on the wire is zero or otherwise impossible.
    #[error("Invalid key id: {0}")]
    InvalidKeyId(u32),

    /// A long-term public key could not be parsed.
    #[error("Invalid public key: {reason}")]
    InvalidPublicKey {
        /// Why the key was rejected
        reason: String,
    },

    // ========================================
    // Replay / Ordering Conflicts
    // ========================================
    /// Counter did not advance.
    #[error("Replay detected: counter {received} not greater than {last}")]
    CounterReplay {
        /// Counter value received
        received: u64,
        /// Highest counter accepted so far
        last: u64,
    },

    /// Key id refers to neither the current nor the previous generation.
    #[error("Unknown key id: {side} key {key_id}")]
    UnknownKeyId {
        /// Whose generation was requested
        side: KeySide,
        /// The requested id
        key_id: u32,
    },

    // ========================================
    // Randomness
    // ========================================
    /// The random source could not supply enough bytes.
    #[error("Short random read: needed {needed} bytes")]
    ShortRandomRead {
        /// Number of bytes requested
        needed: usize,
    },

    // ========================================
    // State Errors
    // ========================================
    /// Operation not valid in the current state.
    #[error("Invalid state for operation: {operation} requires {required_state}")]
    InvalidState {
        /// What operation was attempted
        operation: String,
        /// What state was required
        required_state: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================
    /// Error from the common crate.
    #[error(transparent)]
    Common(CommonError),
}

impl From<CommonError> for CoreError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::ShortRandomRead { needed } => Self::ShortRandomRead { needed },
            other => Self::Common(other),
        }
    }
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `MessageTooShort` error.
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::MessageTooShort { expected, actual }
    }

    /// Creates a `MalformedTlv` error.
    pub fn malformed_tlv(reason: impl Into<String>) -> Self {
        Self::MalformedTlv {
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedMpi` error.
    pub fn malformed_mpi(reason: impl Into<String>) -> Self {
        Self::MalformedMpi {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidGroupElement` error.
    pub fn invalid_group_element(context: impl Into<String>) -> Self {
        Self::InvalidGroupElement {
            context: context.into(),
        }
    }

    /// Creates an `InvalidExponent` error.
    pub fn invalid_exponent(context: impl Into<String>) -> Self {
        Self::InvalidExponent {
            context: context.into(),
        }
    }

    /// Creates an `UnexpectedMessage` error.
    pub fn unexpected(message: impl Into<String>, state: impl Into<String>) -> Self {
        Self::UnexpectedMessage {
            message: message.into(),
            state: state.into(),
        }
    }

    /// Creates an `InvalidPublicKey` error.
    pub fn invalid_public_key(reason: impl Into<String>) -> Self {
        Self::InvalidPublicKey {
            reason: reason.into(),
        }
    }

    /// Creates a `CounterReplay` error.
    pub const fn replay(received: u64, last: u64) -> Self {
        Self::CounterReplay { received, last }
    }

    /// Creates an `UnknownKeyId` error.
    pub const fn unknown_key_id(side: KeySide, key_id: u32) -> Self {
        Self::UnknownKeyId { side, key_id }
    }

    /// Creates a `ShortRandomRead` error.
    pub const fn short_read(needed: usize) -> Self {
        Self::ShortRandomRead { needed }
    }

    /// Creates an `InvalidState` error.
    pub fn invalid_state(
        operation: impl Into<String>,
        required_state: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            required_state: required_state.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns the taxonomy class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedMessage { .. }
            | Self::MessageTooShort { .. }
            | Self::MessageTooLarge { .. }
            | Self::UnknownMessageType(_)
            | Self::MalformedTlv { .. }
            | Self::MalformedMpi { .. } => ErrorKind::Malformed,

            Self::InvalidCommitment
            | Self::BadMac
            | Self::BadSignature
            | Self::InvalidGroupElement { .. }
            | Self::InvalidExponent { .. }
            | Self::ZkpVerificationFailed { .. }
            | Self::UnsupportedVersion(_)
            | Self::UnexpectedMessage { .. }
            | Self::InvalidKeyId(_)
            | Self::InvalidPublicKey { .. } => ErrorKind::ProtocolViolation,

            Self::CounterReplay { .. } | Self::UnknownKeyId { .. } => ErrorKind::Conflict,

            Self::ShortRandomRead { .. } => ErrorKind::Randomness,

            Self::InvalidState { .. } => ErrorKind::State,

            Self::Common(err) => {
                if err.is_client_error() {
                    ErrorKind::Malformed
                } else {
                    ErrorKind::Randomness
                }
            }
        }
    }

    /// Returns `true` for corrupt-input errors.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self.kind(), ErrorKind::Malformed)
    }

    /// Returns `true` for protocol violations.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::ProtocolViolation)
    }

    /// Returns `true` for replay/ordering conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict)
    }

    /// Returns `true` if this error might indicate an attack.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::InvalidCommitment
                | Self::BadMac
                | Self::BadSignature
                | Self::ZkpVerificationFailed { .. }
                | Self::CounterReplay { .. }
        )
    }
}

// ============================================
// Tests
// ============================================
