// ============================================
// File: crates/otr-core/src/protocol/version.rs
// ============================================
//! # Protocol Versioning
//!
//! ## Creation Reason
//! OTR v2 and v3 share every message body; they differ only in whether the
//! common header carries instance tags.
//!
//! ## Version History
//! | Version | Description |
//! |---------|-------------|
//! | 2       | Header: version, type |
//! | 3       | Header: version, type, sender tag, receiver tag |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Parsing rejects every other version with `UnsupportedVersion`
//!
//! ## Last Modified
//! v0.1.0 - Initial version definitions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Preferred protocol version.
pub const CURRENT_PROTOCOL_VERSION: u16 = 3;

/// Header length without instance tags.
pub const V2_HEADER_SIZE: usize = 3;

/// Header length with instance tags.
pub const V3_HEADER_SIZE: usize = 11;

// ============================================
// ProtocolVersion
// ============================================

/// Supported OTR protocol versions.
///
/// # Example
/// ```
/// use otr_core::protocol::ProtocolVersion;
///
/// let version = ProtocolVersion::from_u16(3).unwrap();
/// assert!(version.has_instance_tags());
/// assert!(ProtocolVersion::from_u16(4).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum ProtocolVersion {
    /// OTR version 2
    V2,
    /// OTR version 3
    V3,
}

impl ProtocolVersion {
    /// Parses a wire version number.
    ///
    /// # Errors
    /// Returns `UnsupportedVersion` for anything but 2 or 3.
    pub const fn from_u16(version: u16) -> Result<Self> {
        match version {
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(CoreError::UnsupportedVersion(other)),
        }
    }

    /// Returns the wire version number.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Returns `true` if headers carry instance tags.
    #[must_use]
    pub const fn has_instance_tags(&self) -> bool {
        matches!(self, Self::V3)
    }

    /// Length of the common header for this version.
    #[must_use]
    pub const fn header_size(&self) -> usize {
        match self {
            Self::V2 => V2_HEADER_SIZE,
            Self::V3 => V3_HEADER_SIZE,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V3
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OTRv{}", self.as_u16())
    }
}

impl TryFrom<u16> for ProtocolVersion {
    type Error = CoreError;

    fn try_from(value: u16) -> Result<Self> {
        Self::from_u16(value)
    }
}

impl From<ProtocolVersion> for u16 {
    fn from(version: ProtocolVersion) -> Self {
        version.as_u16()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(ProtocolVersion::from_u16(2).unwrap(), ProtocolVersion::V2);
        assert_eq!(ProtocolVersion::from_u16(3).unwrap(), ProtocolVersion::V3);
        assert_eq!(
            ProtocolVersion::from_u16(1),
            Err(CoreError::UnsupportedVersion(1))
        );
        assert_eq!(ProtocolVersion::default().as_u16(), CURRENT_PROTOCOL_VERSION);
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(ProtocolVersion::V2.header_size(), 3);
        assert_eq!(ProtocolVersion::V3.header_size(), 11);
        assert!(!ProtocolVersion::V2.has_instance_tags());
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProtocolVersion::V3.to_string(), "OTRv3");
    }

    #[test]
    fn test_version_serde() {
        assert_eq!(serde_json::to_string(&ProtocolVersion::V2).unwrap(), "2");
        let v: ProtocolVersion = serde_json::from_str("3").unwrap();
        assert_eq!(v, ProtocolVersion::V3);
        assert!(serde_json::from_str::<ProtocolVersion>("4").is_err());
    }
}
