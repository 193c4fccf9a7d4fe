// ============================================
// File: crates/otr-core/src/ake.rs
// ============================================
//! # Authenticated Key Exchange
//!
//! ## Creation Reason
//! Runs the four-message signed Diffie-Hellman handshake that establishes
//! the first shared secret of a private conversation and proves both
//! long-term identities.
//!
//! ## Main Functionality
//! - `AuthState`: current handshake state, carrying only the data it needs
//! - `AkeContext`: builds outgoing AKE messages and processes incoming ones
//! - `AkeCompletion`: what a finished handshake hands to key management
//!
//! ## Handshake Flow
//! ```text
//! Bob (commits first)                                Alice
//!   │                                                  │
//!   │  DH-Commit: AES_r(g^x), SHA256(g^x)              │
//!   │ ───────────────────────────────────────────────► │
//!   │                                                  │ AwaitingRevealSig
//!   │                                       DH-Key: g^y│
//!   │ ◄─────────────────────────────────────────────── │
//!   │ AwaitingSig                                      │
//!   │  Reveal-Signature: r, AES_c(X_B), MAC_m2         │
//!   │ ───────────────────────────────────────────────► │
//!   │                                                  │ verify commit, MAC, sig
//!   │               Signature: AES_c'(X_A), MAC_m2'    │ ── done
//!   │ ◄─────────────────────────────────────────────── │
//!   │ verify MAC, sig ── done                          │
//! ```
//! `X = PUB || keyid || sig(HMAC-SHA256_m1(g^ours || g^theirs || PUB || keyid))`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Any failure drops back to `None` and wipes the ephemeral secret
//! - Nothing is handed to key management until the peer's signature verifies
//! - Retransmits reuse stored messages and consume no randomness
//! - Simultaneous DH-Commits: the larger commitment hash wins (big-endian)
//!
//! ## Last Modified
//! v0.1.0 - Initial AKE state machine

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use otr_common::types::Ssid;

use crate::crypto::group::{self, mpi_encode};
use crate::crypto::kdf::{calculate_ake_keys, AkeKeySet, AkeKeys};
use crate::crypto::keys::{DhKeyPair, IdentityKeyPair, IdentityPublicKey};
use crate::crypto::transport::{
    aes_ctr_with_raw_key, aes_ctr_zero_iv, hmac_sha256, hmac_sha256_160, verify_mac,
};
use crate::crypto::{fill_random, COMMIT_NONCE_SIZE, ED25519_SIGNATURE_SIZE, MAC_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::codec::{get_array, get_mpi, get_u32, put_data};
use crate::protocol::{DhCommit, DhKey, MessageBody, RevealSignature, Signature};

// ============================================
// Constants
// ============================================

/// Key id each side assigns to its AKE DH key.
pub const AKE_KEY_ID: u32 = 1;

// ============================================
// AuthState
// ============================================

/// Handshake state.
///
/// Each variant owns exactly the material needed for the next step. The
/// private exponents wipe themselves when a variant is dropped.
pub enum AuthState {
    /// No handshake in progress.
    None,
    /// We sent DH-Commit and wait for DH-Key.
    AwaitingDhKey {
        /// Our ephemeral key `x`
        our_dh: DhKeyPair,
        /// Commitment nonce, revealed in Reveal-Signature
        r: Zeroizing<[u8; COMMIT_NONCE_SIZE]>,
        /// The commit we sent, for retransmission
        commit: DhCommit,
    },
    /// We sent DH-Key and wait for Reveal-Signature.
    AwaitingRevealSig {
        /// Our ephemeral key `y`
        our_dh: DhKeyPair,
        /// The peer's commitment
        their_commit: DhCommit,
    },
    /// We sent Reveal-Signature and wait for Signature.
    AwaitingSig {
        /// Our ephemeral key `x`
        our_dh: DhKeyPair,
        /// The peer's `g^y`
        their_dh: BigUint,
        /// Keys derived from `g^xy`
        keys: AkeKeys,
        /// The Reveal-Signature we sent, for retransmission
        reveal_sig: RevealSignature,
    },
}

/// Discriminant of [`AuthState`], for comparisons and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStateKind {
    /// See [`AuthState::None`]
    None,
    /// See [`AuthState::AwaitingDhKey`]
    AwaitingDhKey,
    /// See [`AuthState::AwaitingRevealSig`]
    AwaitingRevealSig,
    /// See [`AuthState::AwaitingSig`]
    AwaitingSig,
}

impl AuthState {
    /// Returns the discriminant.
    #[must_use]
    pub const fn kind(&self) -> AuthStateKind {
        match self {
            Self::None => AuthStateKind::None,
            Self::AwaitingDhKey { .. } => AuthStateKind::AwaitingDhKey,
            Self::AwaitingRevealSig { .. } => AuthStateKind::AwaitingRevealSig,
            Self::AwaitingSig { .. } => AuthStateKind::AwaitingSig,
        }
    }
}

impl fmt::Display for AuthStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "AUTHSTATE_NONE",
            Self::AwaitingDhKey => "AUTHSTATE_AWAITING_DHKEY",
            Self::AwaitingRevealSig => "AUTHSTATE_AWAITING_REVEALSIG",
            Self::AwaitingSig => "AUTHSTATE_AWAITING_SIG",
        };
        f.write_str(name)
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthState::{:?}", self.kind())
    }
}

// ============================================
// Outputs
// ============================================

/// Result of a successful handshake.
#[derive(Debug)]
pub struct AkeCompletion {
    /// Session id
    pub ssid: Ssid,
    /// All AKE-derived keys
    pub keys: AkeKeys,
    /// Our DH key, generation [`AKE_KEY_ID`]
    pub our_dh: DhKeyPair,
    /// Peer's DH public value
    pub their_dh: BigUint,
    /// Peer's key id for `their_dh`
    pub their_key_id: u32,
    /// Peer's long-term key, now authenticated
    pub their_identity: IdentityPublicKey,
}

/// What processing one AKE message produced.
#[derive(Debug, Default)]
pub struct AkeOutput {
    /// Message to send back, if any
    pub reply: Option<MessageBody>,
    /// Set once the handshake has finished
    pub completion: Option<AkeCompletion>,
}

impl AkeOutput {
    fn reply(body: MessageBody) -> Self {
        Self {
            reply: Some(body),
            completion: None,
        }
    }
}

/// Response to a DH-Key message.
#[derive(Debug, Clone)]
pub struct DhKeyResponse {
    /// Reveal-Signature to send
    pub reveal_sig: RevealSignature,
    /// `true` when the DH-Key was a retransmission of one already answered
    pub is_same: bool,
}

// ============================================
// AkeContext
// ============================================

/// Drives one side of the AKE.
///
/// # Example
/// ```
/// use otr_core::ake::AkeContext;
/// use otr_core::crypto::IdentityKeyPair;
/// use otr_core::protocol::MessageBody;
/// use rand::rngs::OsRng;
///
/// let bob_id = IdentityKeyPair::generate(&mut OsRng);
/// let alice_id = IdentityKeyPair::generate(&mut OsRng);
/// let mut bob = AkeContext::new();
/// let mut alice = AkeContext::new();
///
/// let commit = bob.dh_commit_message(&mut OsRng).unwrap();
/// let dh_key = alice.receive(&MessageBody::DhCommit(commit), &alice_id, &mut OsRng).unwrap();
/// let reveal = bob.receive(&dh_key.reply.unwrap(), &bob_id, &mut OsRng).unwrap();
/// let sig = alice.receive(&reveal.reply.unwrap(), &alice_id, &mut OsRng).unwrap();
/// let done = bob.receive(&sig.reply.unwrap(), &bob_id, &mut OsRng).unwrap();
///
/// assert_eq!(done.completion.unwrap().ssid, sig.completion.unwrap().ssid);
/// ```
#[derive(Debug)]
pub struct AkeContext {
    state: AuthState,
}

impl Default for AkeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AkeContext {
    /// Creates a context in `None`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AuthState::None,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> &AuthState {
        &self.state
    }

    /// Returns the current state's discriminant.
    #[must_use]
    pub const fn state_kind(&self) -> AuthStateKind {
        self.state.kind()
    }

    /// Abandons any handshake in progress and wipes its secrets.
    pub fn reset(&mut self) {
        if !matches!(self.state, AuthState::None) {
            debug!(from = %self.state.kind(), "AKE reset");
        }
        self.state = AuthState::None;
    }

    fn transition(&mut self, next: AuthState) {
        trace!(to = %next.kind(), "AKE transition");
        self.state = next;
    }

    // ========================================
    // Outgoing messages
    // ========================================

    /// Starts a new handshake: picks `x` and `r` and returns the DH-Commit.
    ///
    /// Any handshake already in progress is abandoned.
    ///
    /// # Errors
    /// Returns `ShortRandomRead` if `rng` fails; the state is then `None`.
    pub fn dh_commit_message(&mut self, rng: &mut dyn RngCore) -> Result<DhCommit> {
        self.reset();

        let our_dh = DhKeyPair::generate(rng)?;
        let mut r = Zeroizing::new([0u8; COMMIT_NONCE_SIZE]);
        fill_random(rng, &mut r[..])?;

        let mut encrypted_gx = mpi_encode(our_dh.public());
        let hashed_gx: [u8; 32] = Sha256::digest(&encrypted_gx).into();
        aes_ctr_with_raw_key(&r, &mut encrypted_gx);

        let commit = DhCommit {
            encrypted_gx,
            hashed_gx,
        };
        info!("AKE started: sending DH-Commit");
        self.transition(AuthState::AwaitingDhKey {
            our_dh,
            r,
            commit: commit.clone(),
        });
        Ok(commit)
    }

    /// Returns a DH-Key for a fresh `y`.
    fn dh_key_message(rng: &mut dyn RngCore) -> Result<(DhKeyPair, DhKey)> {
        let our_dh = DhKeyPair::generate(rng)?;
        let msg = DhKey {
            gy: our_dh.public().clone(),
        };
        Ok((our_dh, msg))
    }

    /// Builds the Reveal-Signature for the given keys.
    fn reveal_sig_message(
        identity: &IdentityKeyPair,
        keys: &AkeKeys,
        r: &[u8; COMMIT_NONCE_SIZE],
        our_dh: &BigUint,
        their_dh: &BigUint,
    ) -> RevealSignature {
        let (encrypted_signature, mac) =
            build_signed_payload(identity, &keys.reveal, our_dh, their_dh);
        RevealSignature {
            r: *r,
            encrypted_signature,
            mac,
        }
    }

    /// Builds the Signature for the given keys.
    fn sig_message(
        identity: &IdentityKeyPair,
        keys: &AkeKeys,
        our_dh: &BigUint,
        their_dh: &BigUint,
    ) -> Signature {
        let (encrypted_signature, mac) = build_signed_payload(identity, &keys.sig, our_dh, their_dh);
        Signature {
            encrypted_signature,
            mac,
        }
    }

    // ========================================
    // Incoming messages
    // ========================================

    /// Processes any AKE message.
    ///
    /// # Errors
    /// Propagates the error of the matching `process_*` method. Data
    /// messages are refused with `UnexpectedMessage` without touching state.
    pub fn receive(
        &mut self,
        body: &MessageBody,
        identity: &IdentityKeyPair,
        rng: &mut dyn RngCore,
    ) -> Result<AkeOutput> {
        match body {
            MessageBody::DhCommit(msg) => Ok(self
                .process_dh_commit(msg, rng)?
                .map_or_else(AkeOutput::default, AkeOutput::reply)),
            MessageBody::DhKey(msg) => Ok(self
                .process_dh_key(msg, identity)?
                .map_or_else(AkeOutput::default, |r| {
                    AkeOutput::reply(MessageBody::RevealSignature(r.reveal_sig))
                })),
            MessageBody::RevealSignature(msg) => {
                Ok(match self.process_reveal_sig(msg, identity)? {
                    Some((sig, completion)) => AkeOutput {
                        reply: Some(MessageBody::Signature(sig)),
                        completion: Some(completion),
                    },
                    None => AkeOutput::default(),
                })
            }
            MessageBody::Signature(msg) => Ok(AkeOutput {
                reply: None,
                completion: self.process_sig(msg)?,
            }),
            MessageBody::Data(_) => Err(CoreError::unexpected(
                "Data",
                format!("in AKE {}", self.state.kind()),
            )),
        }
    }

    /// Handles a DH-Commit. Returns the reply, if any.
    ///
    /// # Errors
    /// Returns `ShortRandomRead` if a fresh `y` cannot be generated; the
    /// state is then `None`.
    pub fn process_dh_commit(
        &mut self,
        msg: &DhCommit,
        rng: &mut dyn RngCore,
    ) -> Result<Option<MessageBody>> {
        match std::mem::replace(&mut self.state, AuthState::None) {
            AuthState::AwaitingRevealSig { our_dh, .. } => {
                debug!("DH-Commit retransmitted, resending DH-Key");
                let reply = DhKey {
                    gy: our_dh.public().clone(),
                };
                self.transition(AuthState::AwaitingRevealSig {
                    our_dh,
                    their_commit: msg.clone(),
                });
                Ok(Some(MessageBody::DhKey(reply)))
            }
            AuthState::AwaitingDhKey { our_dh, r, commit } => {
                if commit.hashed_gx > msg.hashed_gx {
                    debug!("DH-Commit collision: ours is larger, resending our commit");
                    let reply = MessageBody::DhCommit(commit.clone());
                    self.state = AuthState::AwaitingDhKey { our_dh, r, commit };
                    return Ok(Some(reply));
                }
                debug!("DH-Commit collision: conceding to peer");
                drop(our_dh);
                drop(r);
                self.respond_to_commit(msg, rng)
            }
            AuthState::None | AuthState::AwaitingSig { .. } => self.respond_to_commit(msg, rng),
        }
    }

    fn respond_to_commit(
        &mut self,
        msg: &DhCommit,
        rng: &mut dyn RngCore,
    ) -> Result<Option<MessageBody>> {
        let (our_dh, reply) = Self::dh_key_message(rng)?;
        debug!("DH-Commit received, sending DH-Key");
        self.transition(AuthState::AwaitingRevealSig {
            our_dh,
            their_commit: msg.clone(),
        });
        Ok(Some(MessageBody::DhKey(reply)))
    }

    /// Handles a DH-Key.
    ///
    /// Returns `None` when the message is ignored in this state, otherwise
    /// the Reveal-Signature to send and whether the DH-Key repeated one
    /// already answered.
    ///
    /// # Errors
    /// Returns `InvalidGroupElement` for an out-of-range `g^y`; the state is
    /// then `None`.
    pub fn process_dh_key(
        &mut self,
        msg: &DhKey,
        identity: &IdentityKeyPair,
    ) -> Result<Option<DhKeyResponse>> {
        match std::mem::replace(&mut self.state, AuthState::None) {
            AuthState::AwaitingDhKey { our_dh, r, .. } => {
                group::check_group_element(&msg.gy, "g^y")
                    .inspect_err(|e| warn!(error = %e, "AKE aborted on DH-Key"))?;
                let secret = our_dh.shared_secret(&msg.gy)?;
                let keys = calculate_ake_keys(&secret);
                drop(secret);

                let reveal_sig =
                    Self::reveal_sig_message(identity, &keys, &r, our_dh.public(), &msg.gy);
                debug!("DH-Key received, sending Reveal-Signature");
                self.transition(AuthState::AwaitingSig {
                    our_dh,
                    their_dh: msg.gy.clone(),
                    keys,
                    reveal_sig: reveal_sig.clone(),
                });
                Ok(Some(DhKeyResponse {
                    reveal_sig,
                    is_same: false,
                }))
            }
            AuthState::AwaitingSig {
                our_dh,
                their_dh,
                keys,
                reveal_sig,
            } => {
                let is_same = their_dh == msg.gy;
                let response = is_same.then(|| {
                    debug!("DH-Key retransmitted, resending Reveal-Signature");
                    DhKeyResponse {
                        reveal_sig: reveal_sig.clone(),
                        is_same: true,
                    }
                });
                if !is_same {
                    trace!("ignoring different DH-Key while awaiting Signature");
                }
                self.state = AuthState::AwaitingSig {
                    our_dh,
                    their_dh,
                    keys,
                    reveal_sig,
                };
                Ok(response)
            }
            other => {
                trace!(state = %other.kind(), "ignoring DH-Key");
                self.state = other;
                Ok(None)
            }
        }
    }

    /// Handles a Reveal-Signature.
    ///
    /// On success the handshake is complete: returns the Signature to send
    /// and the completion. Returns `None` when ignored in this state.
    ///
    /// # Errors
    /// - `InvalidCommitment` if the revealed `g^x` does not match the commit
    /// - `InvalidGroupElement` if `g^x` is out of range
    /// - `BadMac` or `BadSignature` if authentication fails
    /// - malformed-class errors for a corrupt payload
    ///
    /// On any error the state is `None` and nothing is installed.
    pub fn process_reveal_sig(
        &mut self,
        msg: &RevealSignature,
        identity: &IdentityKeyPair,
    ) -> Result<Option<(Signature, AkeCompletion)>> {
        match std::mem::replace(&mut self.state, AuthState::None) {
            AuthState::AwaitingRevealSig {
                our_dh,
                their_commit,
            } => {
                let done = Self::verify_reveal_sig(msg, identity, our_dh, &their_commit)
                    .inspect_err(|e| warn!(error = %e, "AKE aborted on Reveal-Signature"))?;
                info!(ssid = %done.1.ssid, "AKE complete (responder)");
                Ok(Some(done))
            }
            other => {
                trace!(state = %other.kind(), "ignoring Reveal-Signature");
                self.state = other;
                Ok(None)
            }
        }
    }

    fn verify_reveal_sig(
        msg: &RevealSignature,
        identity: &IdentityKeyPair,
        our_dh: DhKeyPair,
        their_commit: &DhCommit,
    ) -> Result<(Signature, AkeCompletion)> {
        let mut gx_mpi = Zeroizing::new(their_commit.encrypted_gx.clone());
        aes_ctr_with_raw_key(&msg.r, &mut gx_mpi);
        let hashed: [u8; 32] = Sha256::digest(gx_mpi.as_slice()).into();
        if !bool::from(hashed.ct_eq(&their_commit.hashed_gx)) {
            return Err(CoreError::InvalidCommitment);
        }

        let mut buf = Bytes::copy_from_slice(&gx_mpi);
        let their_dh = get_mpi(&mut buf)?;
        if buf.has_remaining() {
            return Err(CoreError::malformed("trailing bytes after committed g^x"));
        }
        group::check_group_element(&their_dh, "g^x")?;

        let secret = our_dh.shared_secret(&their_dh)?;
        let keys = calculate_ake_keys(&secret);
        drop(secret);

        let (their_identity, their_key_id) = verify_signed_payload(
            &keys.reveal,
            &msg.encrypted_signature,
            &msg.mac,
            &their_dh,
            our_dh.public(),
        )?;

        let sig = Self::sig_message(identity, &keys, our_dh.public(), &their_dh);
        Ok((
            sig,
            AkeCompletion {
                ssid: keys.ssid,
                keys,
                our_dh,
                their_dh,
                their_key_id,
                their_identity,
            },
        ))
    }

    /// Handles a Signature.
    ///
    /// Returns the completion, or `None` when ignored in this state.
    ///
    /// # Errors
    /// `BadMac`, `BadSignature` or malformed-class errors. On any error the
    /// state is `None` and nothing is installed.
    pub fn process_sig(&mut self, msg: &Signature) -> Result<Option<AkeCompletion>> {
        match std::mem::replace(&mut self.state, AuthState::None) {
            AuthState::AwaitingSig {
                our_dh,
                their_dh,
                keys,
                ..
            } => {
                let (their_identity, their_key_id) = verify_signed_payload(
                    &keys.sig,
                    &msg.encrypted_signature,
                    &msg.mac,
                    &their_dh,
                    our_dh.public(),
                )
                .inspect_err(|e| warn!(error = %e, "AKE aborted on Signature"))?;
                info!(ssid = %keys.ssid, "AKE complete (initiator)");
                Ok(Some(AkeCompletion {
                    ssid: keys.ssid,
                    keys,
                    our_dh,
                    their_dh,
                    their_key_id,
                    their_identity,
                }))
            }
            other => {
                trace!(state = %other.kind(), "ignoring Signature");
                self.state = other;
                Ok(None)
            }
        }
    }
}

// ============================================
// Signed Payload
// ============================================

fn transcript_mac(
    keys: &AkeKeySet,
    sender_dh: &BigUint,
    receiver_dh: &BigUint,
    pub_key: &[u8],
    key_id: u32,
) -> [u8; 32] {
    let mut m = BytesMut::new();
    m.put_slice(&mpi_encode(sender_dh));
    m.put_slice(&mpi_encode(receiver_dh));
    m.put_slice(pub_key);
    m.put_u32(key_id);
    hmac_sha256(&keys.m1, &m)
}

fn encrypted_signature_mac(keys: &AkeKeySet, encrypted: &[u8]) -> [u8; MAC_SIZE] {
    let mut buf = BytesMut::with_capacity(encrypted.len() + 4);
    put_data(&mut buf, encrypted);
    hmac_sha256_160(&keys.m2, &buf)
}

/// Builds `AES_c(X)` and its MAC, where `X = PUB || keyid || sig(M)`.
fn build_signed_payload(
    identity: &IdentityKeyPair,
    keys: &AkeKeySet,
    our_dh: &BigUint,
    their_dh: &BigUint,
) -> (Vec<u8>, [u8; MAC_SIZE]) {
    let pub_key = identity.public_key().serialize();
    let m = transcript_mac(keys, our_dh, their_dh, &pub_key, AKE_KEY_ID);
    let signature = identity.sign(&m);

    let mut x = BytesMut::with_capacity(pub_key.len() + 4 + ED25519_SIGNATURE_SIZE);
    x.put_slice(&pub_key);
    x.put_u32(AKE_KEY_ID);
    x.put_slice(&signature);

    let mut encrypted = x.to_vec();
    aes_ctr_zero_iv(&keys.c, &mut encrypted);
    let mac = encrypted_signature_mac(keys, &encrypted);
    (encrypted, mac)
}

/// Checks the MAC, decrypts `X` and verifies the peer's signature.
fn verify_signed_payload(
    keys: &AkeKeySet,
    encrypted: &[u8],
    mac: &[u8; MAC_SIZE],
    their_dh: &BigUint,
    our_dh: &BigUint,
) -> Result<(IdentityPublicKey, u32)> {
    verify_mac(&encrypted_signature_mac(keys, encrypted), mac)?;

    let mut x = encrypted.to_vec();
    aes_ctr_zero_iv(&keys.c, &mut x);
    let mut buf = Bytes::from(x);

    let pub_start = buf.clone();
    let their_identity = IdentityPublicKey::parse(&mut buf)?;
    let pub_key = &pub_start[..pub_start.len() - buf.len()];
    let key_id = get_u32(&mut buf)?;
    if key_id == 0 {
        return Err(CoreError::InvalidKeyId(0));
    }
    let signature: [u8; ED25519_SIGNATURE_SIZE] = get_array(&mut buf)?;
    if buf.has_remaining() {
        return Err(CoreError::malformed("trailing bytes after AKE signature"));
    }

    let m = transcript_mac(keys, their_dh, our_dh, pub_key, key_id);
    their_identity.verify(&m, &signature)?;
    Ok((their_identity, key_id))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_rng::{CountingRng, FailingRng};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    struct Party {
        identity: IdentityKeyPair,
        ake: AkeContext,
    }

    fn party(seed: u64) -> Party {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        Party {
            identity: IdentityKeyPair::generate(&mut rng),
            ake: AkeContext::new(),
        }
    }

    fn step(p: &mut Party, body: &MessageBody, rng: &mut ChaCha20Rng) -> AkeOutput {
        p.ake.receive(body, &p.identity, rng).unwrap()
    }

    fn run_handshake() -> (Party, Party, AkeCompletion, AkeCompletion) {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let mut bob = party(1);
        let mut alice = party(2);

        let commit = bob.ake.dh_commit_message(&mut rng).unwrap();
        let dh_key = step(&mut alice, &MessageBody::DhCommit(commit), &mut rng);
        assert_eq!(alice.ake.state_kind(), AuthStateKind::AwaitingRevealSig);

        let reveal = step(&mut bob, &dh_key.reply.unwrap(), &mut rng);
        assert_eq!(bob.ake.state_kind(), AuthStateKind::AwaitingSig);

        let sig = step(&mut alice, &reveal.reply.unwrap(), &mut rng);
        assert_eq!(alice.ake.state_kind(), AuthStateKind::None);
        let alice_done = sig.completion.unwrap();

        let done = step(&mut bob, &sig.reply.unwrap(), &mut rng);
        assert_eq!(bob.ake.state_kind(), AuthStateKind::None);
        assert!(done.reply.is_none());
        (bob, alice, done.completion.unwrap(), alice_done)
    }

    #[test]
    fn test_full_handshake_agrees_on_keys() {
        let (bob, alice, bob_done, alice_done) = run_handshake();

        assert_eq!(bob_done.ssid, alice_done.ssid);
        assert_eq!(bob_done.keys, alice_done.keys);
        assert_eq!(bob_done.their_dh, *alice_done.our_dh.public());
        assert_eq!(alice_done.their_dh, *bob_done.our_dh.public());
        assert_eq!(bob_done.their_identity, alice.identity.public_key());
        assert_eq!(alice_done.their_identity, bob.identity.public_key());
        assert_eq!(bob_done.their_key_id, AKE_KEY_ID);
    }

    #[test]
    fn test_tampered_commitment_is_rejected() {
        for tamper_hash in [false, true] {
            let mut rng = ChaCha20Rng::seed_from_u64(11);
            let mut bob = party(1);
            let mut alice = party(2);

            let mut commit = bob.ake.dh_commit_message(&mut rng).unwrap();
            if tamper_hash {
                commit.hashed_gx[0] ^= 0x01;
            } else {
                commit.encrypted_gx[5] ^= 0x01;
            }
            let dh_key = step(&mut alice, &MessageBody::DhCommit(commit), &mut rng);
            let reveal = step(&mut bob, &dh_key.reply.unwrap(), &mut rng);

            let err = alice
                .ake
                .receive(&reveal.reply.unwrap(), &alice.identity, &mut rng)
                .unwrap_err();
            assert_eq!(err, CoreError::InvalidCommitment);
            assert_eq!(alice.ake.state_kind(), AuthStateKind::None);
        }
    }

    #[test]
    fn test_tampered_reveal_sig_mac_is_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let mut bob = party(1);
        let mut alice = party(2);

        let commit = bob.ake.dh_commit_message(&mut rng).unwrap();
        let dh_key = step(&mut alice, &MessageBody::DhCommit(commit), &mut rng);
        let reveal = step(&mut bob, &dh_key.reply.unwrap(), &mut rng);
        let Some(MessageBody::RevealSignature(mut msg)) = reveal.reply else {
            panic!("expected Reveal-Signature");
        };
        msg.encrypted_signature[0] ^= 0x80;

        let err = alice.ake.process_reveal_sig(&msg, &alice.identity).unwrap_err();
        assert_eq!(err, CoreError::BadMac);
        assert_eq!(alice.ake.state_kind(), AuthStateKind::None);
    }

    #[test]
    fn test_out_of_range_dh_key_aborts() {
        let mut rng = ChaCha20Rng::seed_from_u64(13);
        let mut bob = party(1);
        bob.ake.dh_commit_message(&mut rng).unwrap();

        for gy in [BigUint::from(1u32), group::modulus() - 1u32] {
            let mut ctx = AkeContext::new();
            ctx.dh_commit_message(&mut rng).unwrap();
            let err = ctx
                .process_dh_key(&DhKey { gy }, &bob.identity)
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidGroupElement { .. }));
            assert_eq!(ctx.state_kind(), AuthStateKind::None);
        }
    }

    #[test]
    fn test_duplicate_dh_commit_gets_identical_reply() {
        let mut rng = ChaCha20Rng::seed_from_u64(14);
        let mut bob = party(1);
        let mut alice = party(2);
        let commit = bob.ake.dh_commit_message(&mut rng).unwrap();

        let mut counting = CountingRng::new(ChaCha20Rng::seed_from_u64(15));
        let first = alice
            .ake
            .process_dh_commit(&commit, &mut counting)
            .unwrap()
            .unwrap();
        let drawn = counting.drawn;
        assert!(drawn > 0);

        let second = alice
            .ake
            .process_dh_commit(&commit, &mut counting)
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(counting.drawn, drawn);
        assert_eq!(alice.ake.state_kind(), AuthStateKind::AwaitingRevealSig);
    }

    #[test]
    fn test_duplicate_dh_key_resends_reveal_sig() {
        let mut rng = ChaCha20Rng::seed_from_u64(16);
        let mut bob = party(1);
        let mut alice = party(2);
        let commit = bob.ake.dh_commit_message(&mut rng).unwrap();
        let Some(MessageBody::DhKey(dh_key)) =
            alice.ake.process_dh_commit(&commit, &mut rng).unwrap()
        else {
            panic!("expected DH-Key");
        };

        let first = bob.ake.process_dh_key(&dh_key, &bob.identity).unwrap().unwrap();
        assert!(!first.is_same);
        let second = bob.ake.process_dh_key(&dh_key, &bob.identity).unwrap().unwrap();
        assert!(second.is_same);
        assert_eq!(first.reveal_sig, second.reveal_sig);

        let other = DhKey {
            gy: BigUint::from(4u32),
        };
        assert!(bob.ake.process_dh_key(&other, &bob.identity).unwrap().is_none());
        assert_eq!(bob.ake.state_kind(), AuthStateKind::AwaitingSig);
    }

    #[test]
    fn test_simultaneous_commit_tie_break() {
        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let mut bob = party(1);
        let mut alice = party(2);
        let bob_commit = bob.ake.dh_commit_message(&mut rng).unwrap();
        let alice_commit = alice.ake.dh_commit_message(&mut rng).unwrap();

        let bob_reply = bob.ake.process_dh_commit(&alice_commit, &mut rng).unwrap();
        let alice_reply = alice.ake.process_dh_commit(&bob_commit, &mut rng).unwrap();

        let (winner_reply, loser_reply) = if bob_commit.hashed_gx > alice_commit.hashed_gx {
            (bob_reply, alice_reply)
        } else {
            (alice_reply, bob_reply)
        };
        assert!(matches!(winner_reply, Some(MessageBody::DhCommit(_))));
        assert!(matches!(loser_reply, Some(MessageBody::DhKey(_))));

        let states = [bob.ake.state_kind(), alice.ake.state_kind()];
        assert!(states.contains(&AuthStateKind::AwaitingDhKey));
        assert!(states.contains(&AuthStateKind::AwaitingRevealSig));
    }

    #[test]
    fn test_unexpected_messages_are_ignored() {
        let (bob, _alice, bob_done, _) = run_handshake();
        let mut ctx = AkeContext::new();
        let sig = Signature {
            encrypted_signature: vec![1, 2, 3],
            mac: [0u8; MAC_SIZE],
        };
        assert!(ctx.process_sig(&sig).unwrap().is_none());
        assert!(ctx
            .process_dh_key(
                &DhKey {
                    gy: bob_done.their_dh.clone()
                },
                &bob.identity
            )
            .unwrap()
            .is_none());
        assert_eq!(ctx.state_kind(), AuthStateKind::None);
    }

    #[test]
    fn test_short_random_read() {
        let mut ctx = AkeContext::new();
        let err = ctx.dh_commit_message(&mut FailingRng).unwrap_err();
        assert!(matches!(err, CoreError::ShortRandomRead { .. }));
        assert_eq!(ctx.state_kind(), AuthStateKind::None);

        let commit = {
            let mut rng = ChaCha20Rng::seed_from_u64(18);
            AkeContext::new().dh_commit_message(&mut rng).unwrap()
        };
        let err = ctx.process_dh_commit(&commit, &mut FailingRng).unwrap_err();
        assert!(matches!(err, CoreError::ShortRandomRead { .. }));
        assert_eq!(ctx.state_kind(), AuthStateKind::None);
    }

    #[test]
    fn test_data_message_refused() {
        let mut rng = ChaCha20Rng::seed_from_u64(19);
        let p = party(3);
        let mut ctx = AkeContext::new();
        ctx.dh_commit_message(&mut rng).unwrap();
        let data = MessageBody::Data(crate::protocol::DataMessage {
            flags: 0,
            sender_key_id: 1,
            recipient_key_id: 1,
            next_dh: BigUint::from(2u32),
            top_half_counter: [0; 8],
            encrypted_message: Vec::new(),
            mac: [0; MAC_SIZE],
            old_mac_keys: Vec::new(),
        });
        assert!(ctx.receive(&data, &p.identity, &mut rng).is_err());
        assert_eq!(ctx.state_kind(), AuthStateKind::AwaitingDhKey);
    }
}
