// ============================================
// File: crates/otr-core/src/crypto/transport.rs
// ============================================
//! # Transport Encryption
//!
//! ## Creation Reason
//! Provides the symmetric primitives applied to AKE and data messages:
//! AES-128 in counter mode and the HMAC constructions used for MACs.
//!
//! ## Main Functionality
//! - `TransportCrypto`: trait for data-message encryption and MACs
//! - `DefaultTransportCrypto`: RustCrypto implementation
//! - `aes_ctr_zero_iv`, `hmac_sha256`, `hmac_sha256_160`: AKE helpers
//! - `verify_mac`: constant-time MAC comparison
//!
//! ## Counter Construction
//! ```text
//! iv (16 bytes) = top half (8 bytes, from the message) || 0x00 * 8
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The top-half counter MUST be unique per sending key
//! - CTR mode is malleable: verify the MAC before decrypting
//!
//! ## Last Modified
//! v0.1.0 - Initial transport crypto implementation

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::kdf::{AesKey, MacKey, WideKey};
use super::{CTR_SIZE, MAC_SIZE, SHA256_SIZE};
use crate::error::{CoreError, Result};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

// ============================================
// TransportCrypto Trait
// ============================================

/// Trait for data-message encryption operations.
///
/// # Purpose
/// Abstracts the cipher and MAC so the data message codec can be tested
/// against alternative implementations.
pub trait TransportCrypto: Send + Sync {
    /// Applies AES-128-CTR with IV `top_half || 0^8` to `data` in place.
    ///
    /// Encryption and decryption are the same operation.
    fn apply_ctr(&self, key: &AesKey, top_half: &[u8; CTR_SIZE], data: &mut [u8]);

    /// Computes the 160-bit data-message MAC over `data`.
    fn mac(&self, key: &MacKey, data: &[u8]) -> [u8; MAC_SIZE];

    /// Verifies a data-message MAC in constant time.
    ///
    /// # Errors
    /// Returns `BadMac` on mismatch.
    fn verify(&self, key: &MacKey, data: &[u8], tag: &[u8; MAC_SIZE]) -> Result<()> {
        verify_mac(&self.mac(key, data), tag)
    }
}

// ============================================
// DefaultTransportCrypto
// ============================================

/// Default implementation using AES-128-CTR and HMAC-SHA1.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportCrypto;

impl DefaultTransportCrypto {
    /// Creates a new instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn make_iv(top_half: &[u8; CTR_SIZE]) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..CTR_SIZE].copy_from_slice(top_half);
        iv
    }
}

impl TransportCrypto for DefaultTransportCrypto {
    fn apply_ctr(&self, key: &AesKey, top_half: &[u8; CTR_SIZE], data: &mut [u8]) {
        let iv = Self::make_iv(top_half);
        let mut cipher = Aes128Ctr::new(key.as_bytes().into(), (&iv).into());
        cipher.apply_keystream(data);
    }

    fn mac(&self, key: &MacKey, data: &[u8]) -> [u8; MAC_SIZE] {
        hmac_sha1(key.as_bytes(), data)
    }
}

// ============================================
// Helper Functions
// ============================================

fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; MAC_SIZE] {
    // HMAC accepts keys of any length.
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC takes any key length"));
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// AES-128-CTR with an all-zero initial counter, as used inside the AKE.
pub fn aes_ctr_zero_iv(key: &AesKey, data: &mut [u8]) {
    DefaultTransportCrypto.apply_ctr(key, &[0u8; CTR_SIZE], data);
}

/// AES-128-CTR with an all-zero counter keyed by raw bytes (the commit nonce `r`).
pub fn aes_ctr_with_raw_key(key: &[u8; 16], data: &mut [u8]) {
    let iv = [0u8; 16];
    let mut cipher = Aes128Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(data);
}

/// Full-width HMAC-SHA256.
#[must_use]
pub fn hmac_sha256(key: &WideKey, data: &[u8]) -> [u8; SHA256_SIZE] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC takes any key length"));
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA256 truncated to 160 bits.
#[must_use]
pub fn hmac_sha256_160(key: &WideKey, data: &[u8]) -> [u8; MAC_SIZE] {
    let full = hmac_sha256(key, data);
    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&full[..MAC_SIZE]);
    out
}

/// Compares two MACs in constant time.
///
/// # Errors
/// Returns `BadMac` on mismatch.
pub fn verify_mac(expected: &[u8], received: &[u8]) -> Result<()> {
    if expected.len() == received.len() && bool::from(expected.ct_eq(received)) {
        Ok(())
    } else {
        Err(CoreError::BadMac)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AesKey {
        let mut key = [0u8; 16];
        for (i, b) in key.iter_mut().enumerate() {
            *b = u8::try_from(i).unwrap();
        }
        AesKey::from_bytes(key)
    }

    #[test]
    fn test_aes_ctr_vector() {
        let crypto = DefaultTransportCrypto::new();
        let mut data = b"Hello, world! OTR data message".to_vec();
        crypto.apply_ctr(&test_key(), &1u64.to_be_bytes(), &mut data);
        assert_eq!(
            hex::encode(&data),
            "5b7df6068b8727d91fd1c6d9119ed68addb44d2538ee6b58fc316154d275"
        );

        crypto.apply_ctr(&test_key(), &1u64.to_be_bytes(), &mut data);
        assert_eq!(data, b"Hello, world! OTR data message");
    }

    #[test]
    fn test_different_counters_produce_different_ciphertext() {
        let crypto = DefaultTransportCrypto::new();
        let mut a = b"same plaintext".to_vec();
        let mut b = a.clone();
        crypto.apply_ctr(&test_key(), &1u64.to_be_bytes(), &mut a);
        crypto.apply_ctr(&test_key(), &2u64.to_be_bytes(), &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hmac_sha1_vector() {
        // RFC 2202 test case 1
        let crypto = DefaultTransportCrypto::new();
        let key = MacKey::from_bytes([0x0b; 20]);
        assert_eq!(
            hex::encode(crypto.mac(&key, b"Hi There")),
            "b617318655057264e28bc0b6fb378c8ef146be00"
        );
    }

    #[test]
    fn test_verify_rejects_tampered_tag() {
        let crypto = DefaultTransportCrypto::new();
        let key = MacKey::from_bytes([0x0b; 20]);
        let mut tag = crypto.mac(&key, b"Hi There");
        assert!(crypto.verify(&key, b"Hi There", &tag).is_ok());

        tag[19] ^= 0x01;
        assert_eq!(crypto.verify(&key, b"Hi There", &tag), Err(CoreError::BadMac));
    }

    #[test]
    fn test_hmac_sha256_truncation() {
        let key = WideKey::from_bytes([0x0b; 32]);
        let full = hmac_sha256(&key, b"data");
        assert_eq!(hmac_sha256_160(&key, b"data")[..], full[..MAC_SIZE]);
    }

    #[test]
    fn test_verify_mac_length_mismatch() {
        assert_eq!(verify_mac(&[0u8; 20], &[0u8; 19]), Err(CoreError::BadMac));
    }
}
