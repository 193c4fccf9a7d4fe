// ============================================
// File: crates/otr-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the fixed-size identifiers that flow between the AKE, SMP
//! and conversation layers, so each gets its own type instead of a bare
//! byte array.
//!
//! ## Main Functionality
//! - `InstanceTag`: per-client tag carried in v3 message headers
//! - `Fingerprint`: SHA-1 fingerprint of a long-term public key (20 bytes)
//! - `Ssid`: 8-byte session id derived by the AKE
//! - `SecretBytes`: heap buffer wiped on drop
//!
//! ## ⚠️ Important Note for Next Developer
//! - Instance tags below 0x100 are reserved; only 0 ("unknown") is allowed
//!   on the wire besides valid tags
//! - `SecretBytes` must never gain a `Display` or revealing `Debug` impl
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CommonError, Result};

// ============================================
// Constants
// ============================================

/// Size of a key fingerprint in bytes.
pub const FINGERPRINT_SIZE: usize = 20;

/// Size of a session id in bytes.
pub const SSID_SIZE: usize = 8;

/// Smallest instance tag a client may pick.
pub const MIN_VALID_INSTANCE_TAG: u32 = 0x0000_0100;

// ============================================
// InstanceTag
// ============================================

/// Identifies one client instance of an account.
///
/// # Wire Format
/// Big-endian `u32` following the message type in v3 headers. The value 0
/// means "not yet known" and is only legal as a receiver tag.
///
/// # Example
/// ```
/// use otr_common::types::InstanceTag;
///
/// let tag = InstanceTag::new(0x1234).unwrap();
/// assert!(tag.is_valid());
/// assert!(InstanceTag::new(0x42).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceTag(u32);

impl InstanceTag {
    /// The "unknown receiver" tag.
    pub const ZERO: Self = Self(0);

    /// Creates a tag, rejecting the reserved range `1..0x100`.
    pub fn new(value: u32) -> Result<Self> {
        if value != 0 && value < MIN_VALID_INSTANCE_TAG {
            return Err(CommonError::out_of_range(
                format!("{value:#x}"),
                format!("{MIN_VALID_INSTANCE_TAG:#x}"),
                format!("{:#x}", u32::MAX),
            ));
        }
        Ok(Self(value))
    }

    /// Wraps a raw wire value without validation.
    #[must_use]
    pub const fn from_wire(value: u32) -> Self {
        Self(value)
    }

    /// Generates a fresh tag in the valid range.
    pub fn generate(rng: &mut dyn RngCore) -> Result<Self> {
        let mut buf = [0u8; 4];
        loop {
            rng.try_fill_bytes(&mut buf)
                .map_err(|_| CommonError::ShortRandomRead { needed: buf.len() })?;
            let value = u32::from_be_bytes(buf);
            if value >= MIN_VALID_INSTANCE_TAG {
                return Ok(Self(value));
            }
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Returns `true` for tags a client may own.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 >= MIN_VALID_INSTANCE_TAG
    }

    /// Returns `true` for the "unknown" tag.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for InstanceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ============================================
// Fingerprint
// ============================================

/// SHA-1 fingerprint of a long-term public key.
///
/// Displayed the way users compare them out of band: five groups of eight
/// upper-case hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    /// Wraps a 20-byte digest.
    #[must_use]
    pub const fn new(bytes: [u8; FINGERPRINT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a fingerprint from a slice of exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; FINGERPRINT_SIZE] = bytes
            .try_into()
            .map_err(|_| CommonError::invalid_length(FINGERPRINT_SIZE, bytes.len()))?;
        Ok(Self(arr))
    }

    /// Returns the raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self
            .0
            .chunks(4)
            .map(hex::encode_upper)
            .collect();
        write!(f, "{}", groups.join(" "))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(&self.0[..4]))
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================
// Ssid
// ============================================

/// Session id: the first 64 bits of `SHA256(0x00 || MPI(s))`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ssid([u8; SSID_SIZE]);

impl Ssid {
    /// Wraps 8 raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; SSID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SSID_SIZE] {
        &self.0
    }
}

impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Users read the two halves aloud separately.
        write!(f, "{} {}", hex::encode(&self.0[..4]), hex::encode(&self.0[4..]))
    }
}

impl fmt::Debug for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ssid({})", hex::encode(self.0))
    }
}

// ============================================
// SecretBytes
// ============================================

/// A heap buffer for secret material, zeroed on drop.
///
/// Holds DH private exponents, the MPI-encoded shared secret and SMP
/// exponents. `wipe()` zeroes the contents early when a generation is
/// rotated out, leaving an empty buffer behind.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Creates a zero-filled buffer of the given length.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    /// Copies the given slice into a new buffer.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self(data.to_vec())
    }

    /// Fills a fresh buffer of `len` bytes from `rng`.
    pub fn random(rng: &mut dyn RngCore, len: usize) -> Result<Self> {
        let mut out = Self::zeroed(len);
        rng.try_fill_bytes(&mut out.0)
            .map_err(|_| CommonError::ShortRandomRead { needed: len })?;
        Ok(out)
    }

    /// Returns the contents.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// Returns the contents mutably.
    pub fn expose_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }

    /// Number of bytes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the buffer holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zeroes and empties the buffer now.
    pub fn wipe(&mut self) {
        self.0.zeroize();
    }

    /// Returns `true` if every byte is zero (an empty buffer counts).
    #[must_use]
    pub fn is_wiped(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_instance_tag_ranges() {
        assert!(InstanceTag::new(0).unwrap().is_zero());
        assert!(InstanceTag::new(0xff).is_err());
        assert!(InstanceTag::new(0x100).unwrap().is_valid());
        assert!(!InstanceTag::from_wire(7).is_valid());
    }

    #[test]
    fn test_instance_tag_generate_is_valid() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for _ in 0..64 {
            assert!(InstanceTag::generate(&mut rng).unwrap().is_valid());
        }
    }

    #[test]
    fn test_instance_tag_serde_transparent() {
        let tag = InstanceTag::new(0x0102_0304).unwrap();
        assert_eq!(serde_json::to_string(&tag).unwrap(), "16909060");
    }

    #[test]
    fn test_fingerprint_display() {
        let mut bytes = [0u8; FINGERPRINT_SIZE];
        bytes[0] = 0xab;
        bytes[19] = 0x01;
        let fp = Fingerprint::new(bytes);
        assert_eq!(
            fp.to_string(),
            "AB000000 00000000 00000000 00000000 00000001"
        );
        assert!(Fingerprint::from_slice(&[0u8; 19]).is_err());
    }

    #[test]
    fn test_ssid_display() {
        let ssid = Ssid::new([0x71, 0xa1, 0xe0, 0x56, 0xc4, 0xc9, 0x19, 0xfa]);
        assert_eq!(ssid.to_string(), "71a1e056 c4c919fa");
    }

    #[test]
    fn test_secret_bytes_wipe() {
        let mut secret = SecretBytes::from_slice(&[0x42; 40]);
        assert!(!secret.is_wiped());
        secret.wipe();
        assert!(secret.is_wiped());
        assert!(secret.is_empty());
    }

    #[test]
    fn test_secret_bytes_debug_redacted() {
        let secret = SecretBytes::from_slice(b"hunter2");
        let shown = format!("{secret:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("REDACTED"));
    }
}
