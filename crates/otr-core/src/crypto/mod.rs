// ============================================
// File: crates/otr-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes the primitives the OTR core is built from, using audited
//! RustCrypto implementations and `num-bigint` for the DH group.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`group`]: 1536-bit MODP group arithmetic, range checks, MPI encoding
//! - [`keys`]: DH key pairs and long-term Ed25519 identity keys
//! - [`kdf`]: AKE key bundles, session keys, SMP hashes, extra key
//! - [`transport`]: AES-128-CTR and the HMAC constructions
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        AKE Phase                            │
//! │   g^x, g^y ──► s = g^xy ──► SHA256(b || MPI(s))            │
//! │                               │                             │
//! │                    ssid, (c, m1, m2), (c', m1', m2')         │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Data Phase                            │
//! │   g^xi, g^yj ──► s ──► SHA1(b || MPI(s)) ──► AES key        │
//! │                                   SHA1(AES key) ──► MAC key │
//! │   AES-128-CTR(ctr || 0^8) + HMAC-SHA1 over the message     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL implementations use RustCrypto (audited)
//! - ALL secret key material lives in zeroizing containers
//! - Randomness failures surface as `ShortRandomRead`, never a panic
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod group;
pub mod kdf;
pub mod keys;
pub mod transport;

use rand::RngCore;

use crate::error::{CoreError, Result};

// Re-export primary types at module level
pub use kdf::{AesKey, AkeKeySet, AkeKeys, MacKey, SessionKeys, SymmetricKey, WideKey};
pub use keys::{DhKeyPair, IdentityKeyPair, IdentityPublicKey, SharedSecret};
pub use transport::{DefaultTransportCrypto, TransportCrypto};

// ============================================
// Constants
// ============================================

/// Size of an AES-128 key in bytes.
pub const AES_KEY_SIZE: usize = 16;

/// Size of the CTR counter carried in data messages.
pub const CTR_SIZE: usize = 8;

/// Size of a truncated MAC on the wire (160 bits).
pub const MAC_SIZE: usize = 20;

/// Size of an HMAC-SHA1 key.
pub const SHA1_MAC_KEY_SIZE: usize = 20;

/// Size of a SHA-256 digest.
pub const SHA256_SIZE: usize = 32;

/// Size of a DH private exponent (320 bits).
pub const DH_PRIVATE_KEY_SIZE: usize = 40;

/// Size of an SMP exponent (1536 bits).
pub const SMP_EXPONENT_SIZE: usize = 192;

/// Size of the DH modulus in bytes.
pub const DH_MODULUS_SIZE: usize = 192;

/// Size of the AKE commitment nonce `r`.
pub const COMMIT_NONCE_SIZE: usize = 16;

/// Size of an Ed25519 public key in bytes.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

// ============================================
// Randomness
// ============================================

/// Fills `buf` from `rng`, reporting failure as `ShortRandomRead`.
///
/// # Errors
/// Returns `ShortRandomRead` if the source cannot supply `buf.len()` bytes.
pub fn fill_random(rng: &mut dyn RngCore, buf: &mut [u8]) -> Result<()> {
    rng.try_fill_bytes(buf)
        .map_err(|_| CoreError::short_read(buf.len()))
}


#[cfg(test)]
mod tests {
    use super::test_rng::FailingRng;
    use super::*;

    #[test]
    fn test_fill_random_short_read() {
        let mut buf = [0u8; DH_PRIVATE_KEY_SIZE];
        let err = fill_random(&mut FailingRng, &mut buf).unwrap_err();
        assert_eq!(err, CoreError::short_read(DH_PRIVATE_KEY_SIZE));
    }
}
