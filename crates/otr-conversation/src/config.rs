// ============================================
// File: crates/otr-conversation/src/config.rs
// ============================================
//! # Conversation Configuration
//!
//! ## Creation Reason
//! Collects the per-conversation knobs (protocol version, instance tag,
//! policy, heartbeat timing, size limit) in one serde structure loadable
//! from TOML.
//!
//! ## Main Functionality
//! - `ConversationConfig`: main configuration structure
//! - `PolicyConfig`: which versions are allowed, whether encryption is
//!   required, whether heartbeats are sent
//! - TOML parsing and validation
//!
//! ## Example Configuration
//! ```toml
//! protocol_version = 3
//! instance_tag = 0x1234
//! heartbeat_interval_secs = 60
//! max_message_size = 65536
//!
//! [policy]
//! allow_v2 = false
//! allow_v3 = true
//! require_encryption = true
//! send_heartbeats = true
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Validate before constructing a `Conversation`; `Conversation::new`
//!   does it again
//! - `instance_tag` is optional; a fresh one is generated when absent
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use otr_common::types::MIN_VALID_INSTANCE_TAG;
use otr_core::protocol::ProtocolVersion;

use crate::error::{ConversationError, Result};

// ============================================
// ConversationConfig
// ============================================

/// Main conversation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Version used when we start the AKE.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: ProtocolVersion,

    /// Fixed instance tag; generated when absent.
    #[serde(default)]
    pub instance_tag: Option<u32>,

    /// Quiet period before a heartbeat, in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Largest accepted incoming wire message, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Policy flags.
    #[serde(default)]
    pub policy: PolicyConfig,
}

const fn default_protocol_version() -> ProtocolVersion {
    ProtocolVersion::V3
}

const fn default_heartbeat_interval() -> u64 {
    60
}

const fn default_max_message_size() -> usize {
    64 * 1024
}

impl ConversationConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// Returns `Config` if the document does not parse or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConversationError::config("<toml>", e.to_string()))?;
        config.validate()?;
        info!(
            version = config.protocol_version.as_u16(),
            "Conversation configuration loaded"
        );
        Ok(config)
    }

    /// Serializes the configuration to TOML.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;

        if !self.policy.allows(self.protocol_version) {
            return Err(ConversationError::config(
                "protocol_version",
                format!("version {} is disabled by policy", self.protocol_version.as_u16()),
            ));
        }
        if let Some(tag) = self.instance_tag {
            if tag < MIN_VALID_INSTANCE_TAG {
                return Err(ConversationError::config(
                    "instance_tag",
                    format!("must be at least {MIN_VALID_INSTANCE_TAG:#x}"),
                ));
            }
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConversationError::config(
                "heartbeat_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.max_message_size < 1024 {
            return Err(ConversationError::config(
                "max_message_size",
                "must be at least 1024",
            ));
        }
        Ok(())
    }

    /// Heartbeat interval as a `Duration`.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            instance_tag: None,
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_message_size: default_max_message_size(),
            policy: PolicyConfig::default(),
        }
    }
}

// ============================================
// PolicyConfig
// ============================================

/// Policy flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct PolicyConfig {
    /// Accept protocol version 2.
    #[serde(default)]
    pub allow_v2: bool,

    /// Accept protocol version 3.
    #[serde(default = "default_true")]
    pub allow_v3: bool,

    /// Refuse to send in the clear.
    #[serde(default)]
    pub require_encryption: bool,

    /// Answer quiet periods with heartbeats.
    #[serde(default = "default_true")]
    pub send_heartbeats: bool,
}

const fn default_true() -> bool {
    true
}

impl PolicyConfig {
    fn validate(&self) -> Result<()> {
        if !self.allow_v2 && !self.allow_v3 {
            return Err(ConversationError::config(
                "policy",
                "at least one protocol version must be allowed",
            ));
        }
        Ok(())
    }

    /// Returns `true` if `version` may be used.
    #[must_use]
    pub const fn allows(&self, version: ProtocolVersion) -> bool {
        match version {
            ProtocolVersion::V2 => self.allow_v2,
            ProtocolVersion::V3 => self.allow_v3,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_v2: false,
            allow_v3: true,
            require_encryption: false,
            send_heartbeats: true,
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
    fn test_default_config() {
        let config = ConversationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol_version, ProtocolVersion::V3);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.max_message_size, 65536);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r"
            protocol_version = 3
            instance_tag = 4660
            heartbeat_interval_secs = 30

            [policy]
            require_encryption = true
        ";
        let config = ConversationConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.instance_tag, Some(0x1234));
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert!(config.policy.require_encryption);
        assert!(config.policy.allow_v3);
        assert!(config.policy.send_heartbeats);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ConversationConfig::from_toml_str("").unwrap();
        assert_eq!(config, ConversationConfig::default());
    }

    #[test]
    fn test_reserved_instance_tag_rejected() {
        let err = ConversationConfig::from_toml_str("instance_tag = 255").unwrap_err();
        assert!(matches!(err, ConversationError::Config { ref field, .. } if field == "instance_tag"));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        assert!(ConversationConfig::from_toml_str("protocol_version = 4").is_err());
    }

    #[test]
    fn test_disabled_version_rejected() {
        let toml = r"
            protocol_version = 2
        ";
        let err = ConversationConfig::from_toml_str(toml).unwrap_err();
        assert!(err.is_config_error());

        let toml = r"
            protocol_version = 2
            [policy]
            allow_v2 = true
        ";
        assert!(ConversationConfig::from_toml_str(toml).is_ok());
    }

    #[test]
    fn test_no_versions_rejected() {
        let toml = r"
            [policy]
            allow_v3 = false
        ";
        assert!(ConversationConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = ConversationConfig {
            instance_tag: Some(0x5555),
            ..ConversationConfig::default()
        };
        let parsed = ConversationConfig::from_toml_str(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }
}
