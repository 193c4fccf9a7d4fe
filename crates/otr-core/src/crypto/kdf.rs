// ============================================
// File: crates/otr-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Creation Reason
//! Every symmetric key in OTR is a domain-separated hash of the MPI-encoded
//! DH shared secret. This module holds those derivations and the key
//! containers they produce.
//!
//! ## Main Functionality
//! - `calculate_ake_keys`: `ssid` and the two `(c, m1, m2)` bundles
//! - `derive_session_keys`: sending/receiving AES and MAC keys for one
//!   pair of key generations, plus the extra symmetric key
//! - `smp_hash`, `smp_secret`: SMP proof hashes and secret derivation
//!
//! ## Derivation Table
//! ```text
//! h2(b) = SHA256(b || MPI(s))          h1(b) = SHA1(b || MPI(s))
//! ssid  = h2(0x00)[0..8]               send  = h1(0x01 high / 0x02 low)[0..16]
//! c, c' = h2(0x01)[0..16], [16..32]    recv  = h1(0x02 high / 0x01 low)[0..16]
//! m1    = h2(0x02)   m2  = h2(0x03)    mac   = SHA1(aes key)
//! m1'   = h2(0x04)   m2' = h2(0x05)    extra = SHA256(0xff || MPI(s))
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never log derived keys, not even in debug builds
//! - "High end" is decided by comparing the two public values as integers
//!
//! ## Last Modified
//! v0.1.0 - Initial KDF implementation

use std::fmt;

use num_bigint::BigUint;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use otr_common::types::{Fingerprint, SecretBytes, Ssid};

use super::keys::SharedSecret;
use super::{AES_KEY_SIZE, SHA1_MAC_KEY_SIZE, SHA256_SIZE};

// ============================================
// SymmetricKey
// ============================================

/// Fixed-size symmetric key, zeroed on drop.
#[derive(Clone)]
pub struct SymmetricKey<const N: usize>([u8; N]);

/// AES-128 key.
pub type AesKey = SymmetricKey<AES_KEY_SIZE>;

/// HMAC-SHA1 key for data messages.
pub type MacKey = SymmetricKey<SHA1_MAC_KEY_SIZE>;

/// HMAC-SHA256 key for the AKE, and the extra symmetric key.
pub type WideKey = SymmetricKey<SHA256_SIZE>;

impl<const N: usize> SymmetricKey<N> {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    fn from_slice_prefix(bytes: &[u8]) -> Self {
        let mut key = [0u8; N];
        key.copy_from_slice(&bytes[..N]);
        Self(key)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> Zeroize for SymmetricKey<N> {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> Drop for SymmetricKey<N> {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<const N: usize> ZeroizeOnDrop for SymmetricKey<N> {}

impl<const N: usize> fmt::Debug for SymmetricKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey<{N}>([REDACTED])")
    }
}

impl<const N: usize> PartialEq for SymmetricKey<N> {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl<const N: usize> Eq for SymmetricKey<N> {}

// ============================================
// AKE Keys
// ============================================

/// One AKE key bundle: an AES key and two HMAC-SHA256 keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AkeKeySet {
    /// Encrypts the signature payload
    pub c: AesKey,
    /// Keys the transcript MAC that gets signed
    pub m1: WideKey,
    /// Keys the MAC over the encrypted signature
    pub m2: WideKey,
}

/// Everything the AKE derives from `s`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AkeKeys {
    /// Session id
    pub ssid: Ssid,
    /// `(c, m1, m2)`, used by the Reveal-Signature message
    pub reveal: AkeKeySet,
    /// `(c', m1', m2')`, used by the Signature message
    pub sig: AkeKeySet,
}

fn h2(b: u8, secret: &SharedSecret) -> [u8; SHA256_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update([b]);
    hasher.update(secret.mpi());
    hasher.finalize().into()
}

fn h1(b: u8, secret: &SharedSecret) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update([b]);
    hasher.update(secret.mpi());
    hasher.finalize().into()
}

/// Derives the AKE keys from the shared secret.
#[must_use]
pub fn calculate_ake_keys(secret: &SharedSecret) -> AkeKeys {
    let mut h = h2(0x00, secret);
    let mut ssid = [0u8; 8];
    ssid.copy_from_slice(&h[..8]);
    h.zeroize();

    let mut cs = h2(0x01, secret);
    let c = AesKey::from_slice_prefix(&cs[..AES_KEY_SIZE]);
    let c_prime = AesKey::from_slice_prefix(&cs[AES_KEY_SIZE..]);
    cs.zeroize();

    AkeKeys {
        ssid: Ssid::new(ssid),
        reveal: AkeKeySet {
            c,
            m1: WideKey::from_bytes(h2(0x02, secret)),
            m2: WideKey::from_bytes(h2(0x03, secret)),
        },
        sig: AkeKeySet {
            c: c_prime,
            m1: WideKey::from_bytes(h2(0x04, secret)),
            m2: WideKey::from_bytes(h2(0x05, secret)),
        },
    }
}

// ============================================
// Session Keys
// ============================================

/// Keys for one `(our key id, their key id)` pair.
#[derive(Clone, Debug)]
pub struct SessionKeys {
    /// Encrypts what we send
    pub sending_aes: AesKey,
    /// MACs what we send
    pub sending_mac: MacKey,
    /// Decrypts what we receive
    pub receiving_aes: AesKey,
    /// Verifies what we receive
    pub receiving_mac: MacKey,
    /// `SHA256(0xff || MPI(s))`
    pub extra_key: WideKey,
}

fn mac_key_for(aes: &AesKey) -> MacKey {
    let digest: [u8; SHA1_MAC_KEY_SIZE] = Sha1::digest(aes.as_bytes()).into();
    MacKey::from_bytes(digest)
}

/// Derives session keys for the given public values and shared secret.
///
/// The party with the numerically larger public value is the high end: it
/// sends with `0x01` and receives with `0x02`.
#[must_use]
pub fn derive_session_keys(
    our_public: &BigUint,
    their_public: &BigUint,
    secret: &SharedSecret,
) -> SessionKeys {
    let (send_byte, recv_byte) = if our_public > their_public {
        (0x01, 0x02)
    } else {
        (0x02, 0x01)
    };

    let mut send = h1(send_byte, secret);
    let mut recv = h1(recv_byte, secret);
    let sending_aes = AesKey::from_slice_prefix(&send);
    let receiving_aes = AesKey::from_slice_prefix(&recv);
    send.zeroize();
    recv.zeroize();

    let mut extra = Sha256::new();
    extra.update([0xff]);
    extra.update(secret.mpi());

    SessionKeys {
        sending_mac: mac_key_for(&sending_aes),
        receiving_mac: mac_key_for(&receiving_aes),
        sending_aes,
        receiving_aes,
        extra_key: WideKey::from_bytes(extra.finalize().into()),
    }
}

// ============================================
// SMP Derivations
// ============================================

/// `SHA256(index || MPI(a) [|| MPI(b)])` as an integer.
#[must_use]
pub fn smp_hash(index: u8, a: &BigUint, b: Option<&BigUint>) -> BigUint {
    let mut hasher = Sha256::new();
    hasher.update([index]);
    hasher.update(super::group::mpi_encode(a));
    if let Some(b) = b {
        hasher.update(super::group::mpi_encode(b));
    }
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Version byte prefixed to the SMP secret hash.
const SMP_SECRET_VERSION: u8 = 0x01;

/// `SHA256(0x01 || initiator fp || responder fp || ssid || secret)`.
#[must_use]
pub fn smp_secret(
    initiator: &Fingerprint,
    responder: &Fingerprint,
    ssid: &Ssid,
    secret: &[u8],
) -> SecretBytes {
    let mut hasher = Sha256::new();
    hasher.update([SMP_SECRET_VERSION]);
    hasher.update(initiator.as_bytes());
    hasher.update(responder.as_bytes());
    hasher.update(ssid.as_bytes());
    hasher.update(secret);
    let mut digest: [u8; SHA256_SIZE] = hasher.finalize().into();
    let out = SecretBytes::from_slice(&digest);
    digest.zeroize();
    out
}

// ============================================
// Tests
// ============================================
