// ============================================
// File: crates/otr-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines the key types used by the AKE and key management with proper
//! security properties (zeroize on drop, explicit early wipe).
//!
//! ## Main Functionality
//! - `DhKeyPair`: ephemeral 320-bit exponent and its public value `g^x`
//! - `SharedSecret`: the MPI-encoded DH output `s`, the input to every KDF
//! - `IdentityKeyPair`: long-term Ed25519 signing key
//! - `IdentityPublicKey`: the peer's long-term key, serialized as `PUB`
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  IdentityKeyPair (Long-term)                               │
//! │  ├─ Generated once, stored by the application              │
//! │  └─ Signs the AKE transcript MAC                           │
//! │                                                            │
//! │  DhKeyPair (Per generation)                                │
//! │  ├─ Created by the AKE or by key rotation                  │
//! │  ├─ Kept for two generations (current, previous)           │
//! │  └─ Wiped when a third generation pushes it out            │
//! │                                                            │
//! │  SharedSecret (Transient)                                  │
//! │  └─ Exists only while session or AKE keys are derived      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The private exponent is stored as zeroizing bytes; the `BigUint` form
//!   is rebuilt for each exponentiation and dropped immediately
//! - A wiped key pair refuses to compute shared secrets
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use sha1::{Digest, Sha1};
use zeroize::Zeroize;

use otr_common::types::{Fingerprint, SecretBytes};

use super::group;
use super::{DH_PRIVATE_KEY_SIZE, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE};
use crate::error::{CoreError, Result};

/// Public key type code for Ed25519 in the `PUB` serialization.
pub const PUBKEY_TYPE_ED25519: u16 = 0x0003;

/// Length of a serialized `PUB`: type code plus key bytes.
pub const SERIALIZED_PUBKEY_SIZE: usize = 2 + ED25519_PUBLIC_KEY_SIZE;

// ============================================
// DhKeyPair
// ============================================

/// An ephemeral Diffie-Hellman key pair in the MODP group.
///
/// # Security
/// - The 40-byte exponent is zeroed on drop
/// - `wipe()` zeroes it early when the generation is retired
pub struct DhKeyPair {
    secret: SecretBytes,
    public: BigUint,
}

impl DhKeyPair {
    /// Generates a fresh key pair from `rng`.
    ///
    /// # Errors
    /// Returns `ShortRandomRead` if the source fails.
    pub fn generate(rng: &mut dyn RngCore) -> Result<Self> {
        let secret = SecretBytes::random(rng, DH_PRIVATE_KEY_SIZE)?;
        Ok(Self::from_secret(secret))
    }

    /// Builds a key pair from a big-endian private exponent.
    #[must_use]
    pub fn from_secret_bytes(bytes: &[u8]) -> Self {
        Self::from_secret(SecretBytes::from_slice(bytes))
    }

    fn from_secret(secret: SecretBytes) -> Self {
        let exponent = BigUint::from_bytes_be(secret.expose());
        let public = group::generator_exp(&exponent);
        Self { secret, public }
    }

    /// Returns the public value `g^x mod p`.
    #[must_use]
    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// Computes `their_public^x mod p`.
    ///
    /// # Errors
    /// - `InvalidGroupElement` if `their_public` is outside `[2, p-2]`
    /// - `InvalidState` if this key pair has been wiped
    pub fn shared_secret(&self, their_public: &BigUint) -> Result<SharedSecret> {
        group::check_group_element(their_public, "peer DH public value")?;
        if self.is_wiped() {
            return Err(CoreError::invalid_state(
                "compute shared secret",
                "unwiped DH private key",
            ));
        }
        let exponent = BigUint::from_bytes_be(self.secret.expose());
        let s = group::mod_exp(their_public, &exponent);
        Ok(SharedSecret::from_value(&s))
    }

    /// Zeroes the private exponent. The public value stays readable.
    pub fn wipe(&mut self) {
        self.secret.wipe();
    }

    /// Returns `true` once the private exponent is gone.
    #[must_use]
    pub fn is_wiped(&self) -> bool {
        self.secret.is_wiped()
    }
}

impl fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.public.to_bytes_be();
        f.debug_struct("DhKeyPair")
            .field("public", &format_args!("{}...", hex::encode(&bytes[..4.min(bytes.len())])))
            .field("wiped", &self.is_wiped())
            .finish()
    }
}

// ============================================
// SharedSecret
// ============================================

/// The DH shared secret `s`, held in its MPI encoding.
///
/// Every OTR KDF hashes `b || MPI(s)`, so the integer form is never kept.
pub struct SharedSecret(SecretBytes);

impl SharedSecret {
    /// Wraps the MPI encoding of `s`.
    #[must_use]
    pub fn from_value(s: &BigUint) -> Self {
        let mut encoded = group::mpi_encode(s);
        let secret = SecretBytes::from_slice(&encoded);
        encoded.zeroize();
        Self(secret)
    }

    /// Returns `MPI(s)`.
    #[must_use]
    pub fn mpi(&self) -> &[u8] {
        self.0.expose()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

// ============================================
// IdentityKeyPair (Ed25519)
// ============================================

/// Long-term Ed25519 identity key pair.
///
/// # Example
/// ```
/// use otr_core::crypto::IdentityKeyPair;
/// use rand::rngs::OsRng;
///
/// let identity = IdentityKeyPair::generate(&mut OsRng);
/// let signature = identity.sign(b"transcript mac");
/// assert!(identity.public_key().verify(b"transcript mac", &signature).is_ok());
/// ```
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generates a new identity key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::generate(rng),
        }
    }

    /// Creates an identity key pair from a 32-byte seed.
    ///
    /// # Errors
    /// Returns `InvalidPublicKey` if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut seed: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::invalid_public_key(format!(
                "Ed25519 seed must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }

    /// Returns the public component.
    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key())
    }

    /// Returns our fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.public_key().fingerprint()
    }

    /// Signs `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Exports the private seed.
    ///
    /// # Security Warning
    /// The caller owns the secret from here on and must wipe it.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print private key material
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// IdentityPublicKey
// ============================================

/// Public component of an Ed25519 identity key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Creates a public key from raw bytes.
    ///
    /// # Errors
    /// Returns `InvalidPublicKey` if the bytes are not a curve point.
    pub fn from_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|_| CoreError::invalid_public_key("not a valid Ed25519 point"))?;
        Ok(Self(key))
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ED25519_PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// SHA-1 over the raw key bytes.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let digest = Sha1::digest(self.0.as_bytes());
        Fingerprint::new(digest.into())
    }

    /// Verifies `signature` over `message`.
    ///
    /// # Errors
    /// Returns `BadSignature` if verification fails.
    pub fn verify(&self, message: &[u8], signature: &[u8; ED25519_SIGNATURE_SIZE]) -> Result<()> {
        let sig = Signature::from_bytes(signature);
        self.0
            .verify_strict(message, &sig)
            .map_err(|_| CoreError::BadSignature)
    }

    /// Writes `PUB`: `u16 type || key bytes`.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u16(PUBKEY_TYPE_ED25519);
        buf.put_slice(self.0.as_bytes());
    }

    /// Returns the `PUB` serialization.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(SERIALIZED_PUBKEY_SIZE);
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Reads a `PUB` from the front of `buf`.
    ///
    /// # Errors
    /// - `MessageTooShort` if fewer than 34 bytes remain
    /// - `InvalidPublicKey` for an unknown type code or a bad point
    pub fn parse(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < SERIALIZED_PUBKEY_SIZE {
            return Err(CoreError::too_short(SERIALIZED_PUBKEY_SIZE, buf.remaining()));
        }
        let key_type = buf.get_u16();
        if key_type != PUBKEY_TYPE_ED25519 {
            return Err(CoreError::invalid_public_key(format!(
                "unsupported key type 0x{key_type:04x}"
            )));
        }
        let mut raw = [0u8; ED25519_PUBLIC_KEY_SIZE];
        buf.copy_to_slice(&mut raw);
        Self::from_bytes(&raw)
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({}...)", hex::encode(&self.0.as_bytes()[..4]))
    }
}

impl fmt::Display for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_rng::FailingRng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_dh_key_agreement() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let alice = DhKeyPair::generate(&mut rng).unwrap();
        let bob = DhKeyPair::generate(&mut rng).unwrap();

        let s1 = alice.shared_secret(bob.public()).unwrap();
        let s2 = bob.shared_secret(alice.public()).unwrap();
        assert_eq!(s1.mpi(), s2.mpi());
        assert!(group::is_group_element(alice.public()));
    }

    #[test]
    fn test_dh_generate_short_read() {
        let err = DhKeyPair::generate(&mut FailingRng).unwrap_err();
        assert_eq!(err, CoreError::short_read(DH_PRIVATE_KEY_SIZE));
    }

    #[test]
    fn test_dh_wipe_zeroes_secret() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let mut kp = DhKeyPair::generate(&mut rng).unwrap();
        let peer = DhKeyPair::generate(&mut rng).unwrap();

        kp.wipe();
        assert!(kp.is_wiped());
        assert!(kp.shared_secret(peer.public()).is_err());
    }

    #[test]
    fn test_dh_rejects_out_of_range_peer_value() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let kp = DhKeyPair::generate(&mut rng).unwrap();
        let err = kp.shared_secret(&BigUint::from(1u32)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidGroupElement { .. }));
    }

    #[test]
    fn test_identity_sign_verify() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let kp = IdentityKeyPair::generate(&mut rng);
        let signature = kp.sign(b"test message");

        assert!(kp.public_key().verify(b"test message", &signature).is_ok());
        assert_eq!(
            kp.public_key().verify(b"wrong message", &signature),
            Err(CoreError::BadSignature)
        );
    }

    #[test]
    fn test_identity_keypair_roundtrip() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let kp = IdentityKeyPair::generate(&mut rng);
        let restored = IdentityKeyPair::from_bytes(&kp.to_bytes()).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
        assert!(IdentityKeyPair::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_public_key_serialization() {
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let public = IdentityKeyPair::generate(&mut rng).public_key();

        let serialized = public.serialize();
        assert_eq!(serialized.len(), SERIALIZED_PUBKEY_SIZE);
        assert_eq!(&serialized[..2], &[0x00, 0x03]);

        let mut buf = Bytes::from(serialized);
        assert_eq!(IdentityPublicKey::parse(&mut buf).unwrap(), public);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_public_key_parse_rejects_other_types() {
        let mut raw = vec![0x00, 0x00];
        raw.extend_from_slice(&[0u8; 32]);
        let err = IdentityPublicKey::parse(&mut Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPublicKey { .. }));

        let err = IdentityPublicKey::parse(&mut Bytes::from_static(&[0, 3, 1])).unwrap_err();
        assert!(matches!(err, CoreError::MessageTooShort { .. }));
    }

    #[test]
    fn test_fingerprint_is_sha1_of_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let public = IdentityKeyPair::generate(&mut rng).public_key();
        let expected = Sha1::digest(public.as_bytes());
        assert_eq!(public.fingerprint().as_bytes()[..], expected[..]);
    }
}
