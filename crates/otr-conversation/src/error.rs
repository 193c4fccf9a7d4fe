// ============================================
// File: crates/otr-conversation/src/error.rs
// ============================================
//! # Conversation Error Types
//!
//! ## Main Functionality
//! `ConversationError` wraps the core and common errors and adds the
//! failures of the conversation surface itself: wrong message state,
//! policy refusals, bad configuration.
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use otr_common::error::CommonError;
use otr_common::InstanceTag;
use otr_core::error::{CoreError, ErrorKind};

use crate::conversation::MessageState;

/// Result type for conversation operations.
pub type Result<T> = std::result::Result<T, ConversationError>;

/// Conversation error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// The operation needs an encrypted session.
    #[error("Conversation is not encrypted (state: {state})")]
    NotEncrypted {
        /// Current message state
        state: MessageState,
    },

    /// The peer ended the session; call `end()` before sending again.
    #[error("Conversation was ended by the peer")]
    ConversationFinished,

    /// Policy forbids sending in the clear.
    #[error("Encryption is required by policy")]
    EncryptionRequired,

    /// `provide_smp_secret` called without a pending SMP request.
    #[error("No SMP request is waiting for a secret")]
    SmpNotAwaitingSecret,

    /// A message addressed to another instance.
    #[error("Message for instance {received} (ours is {ours})")]
    WrongInstance {
        /// Receiver tag on the message
        received: InstanceTag,
        /// Our tag
        ours: InstanceTag,
    },

    /// The message exceeds the configured size limit.
    #[error("Message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Received size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {field} - {reason}")]
    Config {
        /// Offending field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Error from the protocol core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from the common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl ConversationError {
    /// Creates a `Config` error.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns `true` if the message should be dropped and the session kept:
    /// replays, unknown key ids, malformed input.
    #[must_use]
    pub fn is_droppable(&self) -> bool {
        match self {
            Self::Core(e) => matches!(e.kind(), ErrorKind::Conflict | ErrorKind::Malformed),
            Self::WrongInstance { .. } | Self::MessageTooLarge { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the random source failed.
    #[must_use]
    pub fn is_randomness_failure(&self) -> bool {
        match self {
            Self::Core(e) => e.kind() == ErrorKind::Randomness,
            Self::Common(CommonError::ShortRandomRead { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConversationError::config("instance_tag", "reserved value");
        assert!(err.to_string().contains("instance_tag"));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_error_classification() {
        let replay = ConversationError::from(CoreError::replay(3, 5));
        assert!(replay.is_droppable());
        assert!(!replay.is_randomness_failure());

        let bad_mac = ConversationError::from(CoreError::BadMac);
        assert!(!bad_mac.is_droppable());

        let short = ConversationError::from(CoreError::short_read(40));
        assert!(short.is_randomness_failure());
    }
}
