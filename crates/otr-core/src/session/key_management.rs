// ============================================
// File: crates/otr-core/src/session/key_management.rs
// ============================================
//! # Key Management
//!
//! ## Creation Reason
//! After the AKE, both sides keep rotating their DH keys so that each
//! message is protected by short-lived keys. This module owns those keys,
//! derives per-generation session keys and tracks which MAC keys must be
//! disclosed once their generation is forgotten.
//!
//! ## Main Functionality
//! - `KeyManagementContext`: two retained generations per side
//! - Session key derivation for `(our key id, their key id)`
//! - Send counter and replay check on the receive counter
//! - MAC key history and the pending `old_mac_keys` disclosure queue
//!
//! ## Generations
//! ```text
//! ours:   previous (id - 1) │ current (id)      ── we send with previous
//! theirs: previous (id - 1) │ current (id)      ── we send to current
//!
//! peer acknowledges our current  ──► rotate ours:   previous ← current ← fresh
//! peer uses its current          ──► rotate theirs: previous ← current ← next_dh
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A retired private key is wiped before it is dropped
//! - Forgotten generations' MAC keys move to `old_mac_keys`
//! - Key ids older than `previous` are an error, not a lookup miss
//!
//! ## Last Modified
//! v0.1.0 - Initial key management

use num_bigint::BigUint;
use rand::RngCore;
use tracing::{debug, trace, warn};

use crate::crypto::group;
use crate::crypto::kdf::{derive_session_keys, MacKey, SessionKeys};
use crate::crypto::keys::DhKeyPair;
use crate::crypto::CTR_SIZE;
use crate::error::{CoreError, KeySide, Result};

// ============================================
// MacKeyRecord
// ============================================

/// A receiving MAC key remembered for later disclosure.
#[derive(Debug, Clone)]
struct MacKeyRecord {
    our_key_id: u32,
    their_key_id: u32,
    receiving_mac: MacKey,
}

// ============================================
// KeyManagementContext
// ============================================

/// DH key generations, counters and MAC key history for one session.
///
/// # Example
/// ```
/// use otr_core::crypto::DhKeyPair;
/// use otr_core::session::KeyManagementContext;
/// use rand::rngs::OsRng;
///
/// let ours = DhKeyPair::generate(&mut OsRng).unwrap();
/// let theirs = DhKeyPair::generate(&mut OsRng).unwrap();
///
/// let mut keys = KeyManagementContext::new();
/// keys.install(ours, theirs.public().clone(), 1, &mut OsRng).unwrap();
/// assert_eq!(keys.our_key_id(), 2);
/// assert_eq!(keys.sending_key_ids(), (1, 1));
/// ```
#[derive(Debug, Default)]
pub struct KeyManagementContext {
    our_key_id: u32,
    their_key_id: u32,
    our_current: Option<DhKeyPair>,
    our_previous: Option<DhKeyPair>,
    their_current: Option<BigUint>,
    their_previous: Option<BigUint>,
    our_counter: u64,
    their_counter: u64,
    mac_key_history: Vec<MacKeyRecord>,
    old_mac_keys: Vec<MacKey>,
}

impl KeyManagementContext {
    /// Creates an empty context. Nothing can be sent until [`install`](Self::install).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the AKE result and generates our next key.
    ///
    /// `our_dh` becomes generation 1; a fresh generation 2 is created so the
    /// peer learns it from our first data message.
    ///
    /// # Errors
    /// - `InvalidKeyId` if `their_key_id` is zero
    /// - `InvalidGroupElement` if `their_dh` is out of range
    /// - `ShortRandomRead` if the next key cannot be generated
    pub fn install(
        &mut self,
        our_dh: DhKeyPair,
        their_dh: BigUint,
        their_key_id: u32,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        if their_key_id == 0 {
            return Err(CoreError::InvalidKeyId(0));
        }
        group::check_group_element(&their_dh, "peer AKE DH value")?;
        let next = DhKeyPair::generate(rng)?;

        self.wipe();
        self.our_key_id = 1;
        self.our_current = Some(our_dh);
        self.their_key_id = their_key_id;
        self.their_current = Some(their_dh);
        self.our_counter = 1;
        self.install_new_dh_key_pair(next);
        debug!(
            our_key_id = self.our_key_id,
            their_key_id = self.their_key_id,
            "session keys installed"
        );
        Ok(())
    }

    // ========================================
    // Accessors
    // ========================================

    /// Returns `true` once [`install`](Self::install) has run.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.our_current.is_some() && self.their_current.is_some()
    }

    /// Our current generation id.
    #[must_use]
    pub const fn our_key_id(&self) -> u32 {
        self.our_key_id
    }

    /// The peer's current generation id.
    #[must_use]
    pub const fn their_key_id(&self) -> u32 {
        self.their_key_id
    }

    /// Our newest public value, advertised in every data message.
    #[must_use]
    pub fn our_current_public(&self) -> Option<&BigUint> {
        self.our_current.as_ref().map(DhKeyPair::public)
    }

    /// The key ids outgoing messages use: our previous and their current.
    #[must_use]
    pub const fn sending_key_ids(&self) -> (u32, u32) {
        (self.our_key_id.saturating_sub(1), self.their_key_id)
    }

    /// Highest counter accepted from the peer.
    #[must_use]
    pub const fn their_counter(&self) -> u64 {
        self.their_counter
    }

    /// The counter the next outgoing message will carry.
    #[must_use]
    pub const fn our_counter(&self) -> u64 {
        self.our_counter
    }

    /// Returns `true` if there are MAC keys waiting to be disclosed.
    #[must_use]
    pub fn has_old_mac_keys(&self) -> bool {
        !self.old_mac_keys.is_empty()
    }

    // ========================================
    // Our Keys
    // ========================================

    /// Generates a fresh key pair and makes it current.
    ///
    /// # Errors
    /// Returns `ShortRandomRead` if `rng` fails; nothing is changed then.
    pub fn generate_new_dh_key_pair(&mut self, rng: &mut dyn RngCore) -> Result<Option<DhKeyPair>> {
        let next = DhKeyPair::generate(rng)?;
        Ok(self.install_new_dh_key_pair(next))
    }

    /// Shifts current to previous and installs `next` as current.
    ///
    /// The forgotten generation's MAC keys are queued for disclosure and its
    /// private key is wiped. Returns that wiped pair, if there was one.
    pub fn install_new_dh_key_pair(&mut self, next: DhKeyPair) -> Option<DhKeyPair> {
        self.reveal_mac_keys_for_our_previous_key_id();
        let mut retired = self.our_previous.take();
        if let Some(old) = retired.as_mut() {
            old.wipe();
        }
        self.our_previous = self.our_current.replace(next);
        self.our_key_id = self.our_key_id.wrapping_add(1);
        debug!(our_key_id = self.our_key_id, "rotated our DH key");
        retired
    }

    /// Rotates our keys if the peer has used our current generation.
    ///
    /// A `recipient_key_id` for an already-acknowledged generation is a
    /// no-op. Returns the wiped retired pair when a rotation happened.
    pub fn rotate_our_keys(&mut self, recipient_key_id: u32, next: DhKeyPair) -> Option<DhKeyPair> {
        if recipient_key_id == self.our_key_id {
            self.install_new_dh_key_pair(next)
        } else {
            trace!(recipient_key_id, our_key_id = self.our_key_id, "no rotation of our keys");
            None
        }
    }

    /// Returns `true` if a message addressed to `recipient_key_id` will
    /// trigger [`rotate_our_keys`](Self::rotate_our_keys).
    #[must_use]
    pub const fn needs_our_rotation(&self, recipient_key_id: u32) -> bool {
        recipient_key_id == self.our_key_id
    }

    // ========================================
    // Their Keys
    // ========================================

    /// Rotates the peer's key if it sent from its current generation.
    ///
    /// # Errors
    /// Returns `InvalidGroupElement` if `next_dh` is out of range; nothing
    /// is changed then.
    pub fn rotate_their_key(&mut self, sender_key_id: u32, next_dh: BigUint) -> Result<()> {
        if sender_key_id != self.their_key_id {
            trace!(sender_key_id, their_key_id = self.their_key_id, "no rotation of their key");
            return Ok(());
        }
        group::check_group_element(&next_dh, "next DH value")?;
        self.reveal_mac_keys_for_their_previous_key_id();
        self.their_previous = self.their_current.replace(next_dh);
        self.their_key_id = self.their_key_id.wrapping_add(1);
        debug!(their_key_id = self.their_key_id, "rotated their DH key");
        Ok(())
    }

    // ========================================
    // Session Keys
    // ========================================

    /// Derives the session keys for the given generations.
    ///
    /// The receiving MAC key is remembered so it can be revealed once one
    /// of the generations is forgotten.
    ///
    /// # Errors
    /// - `UnknownKeyId` if either id is neither current nor previous
    /// - `InvalidState` if the matching private key has been wiped
    pub fn calculate_dh_session_keys(
        &mut self,
        our_key_id: u32,
        their_key_id: u32,
    ) -> Result<SessionKeys> {
        let keys = self.session_keys(our_key_id, their_key_id)?;
        self.remember_receiving_mac(our_key_id, their_key_id, &keys);
        Ok(keys)
    }

    /// Derives the session keys without touching the MAC key history.
    ///
    /// Used on the receive path, where the key is only remembered once the
    /// message authenticates.
    ///
    /// # Errors
    /// Same as [`calculate_dh_session_keys`](Self::calculate_dh_session_keys).
    pub fn session_keys(&self, our_key_id: u32, their_key_id: u32) -> Result<SessionKeys> {
        let ours = self.our_pair(our_key_id)?;
        let theirs = self.their_public(their_key_id)?;
        let secret = ours.shared_secret(theirs)?;
        Ok(derive_session_keys(ours.public(), theirs, &secret))
    }

    /// Records the receiving MAC key of a generation pair, once.
    pub fn remember_receiving_mac(&mut self, our_key_id: u32, their_key_id: u32, keys: &SessionKeys) {
        let known = self
            .mac_key_history
            .iter()
            .any(|r| r.our_key_id == our_key_id && r.their_key_id == their_key_id);
        if !known {
            self.mac_key_history.push(MacKeyRecord {
                our_key_id,
                their_key_id,
                receiving_mac: keys.receiving_mac.clone(),
            });
        }
    }

    /// Number of receiving MAC keys remembered but not yet queued for disclosure.
    #[must_use]
    pub fn remembered_mac_keys(&self) -> usize {
        self.mac_key_history.len()
    }

    fn our_pair(&self, key_id: u32) -> Result<&DhKeyPair> {
        let slot = if key_id == 0 {
            None
        } else if key_id == self.our_key_id {
            self.our_current.as_ref()
        } else if key_id == self.our_key_id.wrapping_sub(1) {
            self.our_previous.as_ref()
        } else {
            None
        };
        slot.ok_or_else(|| CoreError::unknown_key_id(KeySide::Ours, key_id))
    }

    fn their_public(&self, key_id: u32) -> Result<&BigUint> {
        let slot = if key_id == 0 {
            None
        } else if key_id == self.their_key_id {
            self.their_current.as_ref()
        } else if key_id == self.their_key_id.wrapping_sub(1) {
            self.their_previous.as_ref()
        } else {
            None
        };
        slot.ok_or_else(|| CoreError::unknown_key_id(KeySide::Theirs, key_id))
    }

    // ========================================
    // Counters
    // ========================================

    /// Returns the counter for the next outgoing message and advances it.
    pub fn next_counter(&mut self) -> [u8; CTR_SIZE] {
        let ctr = self.our_counter;
        self.our_counter = self.our_counter.saturating_add(1);
        ctr.to_be_bytes()
    }

    /// Accepts `counter` only if it is greater than every counter seen.
    ///
    /// # Errors
    /// Returns `CounterReplay` otherwise; the stored counter is unchanged.
    pub fn check_message_counter(&mut self, counter: u64) -> Result<()> {
        if counter <= self.their_counter {
            warn!(counter, last = self.their_counter, "rejected stale counter");
            return Err(CoreError::replay(counter, self.their_counter));
        }
        self.their_counter = counter;
        Ok(())
    }

    // ========================================
    // MAC Key Disclosure
    // ========================================

    /// Queues the MAC keys of our previous generation for disclosure.
    pub fn reveal_mac_keys_for_our_previous_key_id(&mut self) {
        let id = self.our_key_id.wrapping_sub(1);
        self.reveal_where(|r| r.our_key_id == id);
    }

    /// Queues the MAC keys of the peer's previous generation for disclosure.
    pub fn reveal_mac_keys_for_their_previous_key_id(&mut self) {
        let id = self.their_key_id.wrapping_sub(1);
        self.reveal_where(|r| r.their_key_id == id);
    }

    fn reveal_where(&mut self, forgotten: impl Fn(&MacKeyRecord) -> bool) {
        let (revealed, kept): (Vec<_>, Vec<_>) =
            self.mac_key_history.drain(..).partition(|r| forgotten(r));
        self.mac_key_history = kept;
        if !revealed.is_empty() {
            trace!(count = revealed.len(), "queued MAC keys for disclosure");
        }
        self.old_mac_keys
            .extend(revealed.into_iter().map(|r| r.receiving_mac));
    }

    /// Drains the disclosure queue as concatenated 20-byte keys.
    pub fn take_old_mac_keys(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.old_mac_keys.len() * 20);
        for key in self.old_mac_keys.drain(..) {
            out.extend_from_slice(key.as_bytes());
        }
        out
    }

    // ========================================
    // Teardown
    // ========================================

    /// Wipes every key and resets the context.
    pub fn wipe(&mut self) {
        for pair in [self.our_current.as_mut(), self.our_previous.as_mut()]
            .into_iter()
            .flatten()
        {
            pair.wipe();
        }
        *self = Self::default();
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn pair_of_contexts() -> (KeyManagementContext, KeyManagementContext, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let a_dh = DhKeyPair::generate(&mut rng).unwrap();
        let b_dh = DhKeyPair::generate(&mut rng).unwrap();
        let a_pub = a_dh.public().clone();
        let b_pub = b_dh.public().clone();

        let mut a = KeyManagementContext::new();
        let mut b = KeyManagementContext::new();
        a.install(a_dh, b_pub, 1, &mut rng).unwrap();
        b.install(b_dh, a_pub, 1, &mut rng).unwrap();
        (a, b, rng)
    }

    #[test]
    fn test_install_sets_generations() {
        let (a, _b, _) = pair_of_contexts();
        assert!(a.is_established());
        assert_eq!(a.our_key_id(), 2);
        assert_eq!(a.their_key_id(), 1);
        assert_eq!(a.sending_key_ids(), (1, 1));
        assert_eq!(a.our_counter(), 1);
        assert_eq!(a.their_counter(), 0);
    }

    #[test]
    fn test_both_sides_derive_mirrored_keys() {
        let (mut a, mut b, _) = pair_of_contexts();
        let ka = a.calculate_dh_session_keys(1, 1).unwrap();
        let kb = b.calculate_dh_session_keys(1, 1).unwrap();
        assert_eq!(ka.sending_aes, kb.receiving_aes);
        assert_eq!(ka.sending_mac, kb.receiving_mac);
        assert_eq!(ka.receiving_aes, kb.sending_aes);
        assert_eq!(ka.extra_key, kb.extra_key);
    }

    #[test]
    fn test_counter_replay_rejection() {
        let (mut a, _b, _) = pair_of_contexts();
        a.check_message_counter(5).unwrap();
        assert_eq!(a.their_counter(), 5);

        assert_eq!(a.check_message_counter(5), Err(CoreError::replay(5, 5)));
        assert_eq!(a.check_message_counter(3), Err(CoreError::replay(3, 5)));
        assert_eq!(a.their_counter(), 5);

        a.check_message_counter(6).unwrap();
        assert_eq!(a.their_counter(), 6);
    }

    #[test]
    fn test_next_counter_increments() {
        let (mut a, _b, _) = pair_of_contexts();
        assert_eq!(a.next_counter(), 1u64.to_be_bytes());
        assert_eq!(a.next_counter(), 2u64.to_be_bytes());
        assert_eq!(a.our_counter(), 3);
    }

    #[test]
    fn test_rotation_wipes_and_forgets() {
        let (mut a, _b, mut rng) = pair_of_contexts();
        a.calculate_dh_session_keys(1, 1).unwrap();

        // Acknowledged generation: no-op
        let next = DhKeyPair::generate(&mut rng).unwrap();
        assert!(a.rotate_our_keys(1, next).is_none());
        assert_eq!(a.our_key_id(), 2);

        // Current generation acknowledged: generation 1 is forgotten
        let next = DhKeyPair::generate(&mut rng).unwrap();
        let retired = a.rotate_our_keys(2, next).unwrap();
        assert!(retired.is_wiped());
        assert_eq!(a.our_key_id(), 3);
        assert_eq!(
            a.calculate_dh_session_keys(1, 1).unwrap_err(),
            CoreError::unknown_key_id(KeySide::Ours, 1)
        );
        assert!(a.calculate_dh_session_keys(2, 1).is_ok());

        // MAC key for (1, 1) is now disclosed
        assert!(a.has_old_mac_keys());
        assert_eq!(a.take_old_mac_keys().len(), 20);
        assert!(!a.has_old_mac_keys());
    }

    #[test]
    fn test_rotate_their_key() {
        let (mut a, b, mut rng) = pair_of_contexts();
        let b_next = DhKeyPair::generate(&mut rng).unwrap();

        a.rotate_their_key(1, b.our_current_public().unwrap().clone())
            .unwrap();
        assert_eq!(a.their_key_id(), 2);
        assert!(a.calculate_dh_session_keys(1, 1).is_ok());
        assert!(a.calculate_dh_session_keys(1, 2).is_ok());

        // Stale sender id: no-op
        a.rotate_their_key(1, b_next.public().clone()).unwrap();
        assert_eq!(a.their_key_id(), 2);

        a.rotate_their_key(2, b_next.public().clone()).unwrap();
        assert_eq!(
            a.calculate_dh_session_keys(1, 1).unwrap_err(),
            CoreError::unknown_key_id(KeySide::Theirs, 1)
        );
    }

    #[test]
    fn test_rotate_their_key_rejects_bad_value() {
        let (mut a, _b, _) = pair_of_contexts();
        let err = a.rotate_their_key(1, BigUint::from(1u32)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidGroupElement { .. }));
        assert_eq!(a.their_key_id(), 1);
    }

    #[test]
    fn test_unknown_ids() {
        let (mut a, _b, _) = pair_of_contexts();
        assert!(a.calculate_dh_session_keys(0, 1).unwrap_err().is_conflict());
        assert!(a.calculate_dh_session_keys(7, 1).unwrap_err().is_conflict());
        assert!(a.calculate_dh_session_keys(1, 9).unwrap_err().is_conflict());
    }

    #[test]
    fn test_wipe() {
        let (mut a, _b, _) = pair_of_contexts();
        a.wipe();
        assert!(!a.is_established());
        assert_eq!(a.our_key_id(), 0);
        assert!(a.calculate_dh_session_keys(0, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_counter_is_monotonic(counters in proptest::collection::vec(0u64..1000, 1..50)) {
            let mut ctx = KeyManagementContext::new();
            let mut highest = 0u64;
            for c in counters {
                let accepted = ctx.check_message_counter(c).is_ok();
                prop_assert_eq!(accepted, c > highest);
                highest = highest.max(c);
                prop_assert_eq!(ctx.their_counter(), highest);
            }
        }
    }

    #[test]
    fn test_session_keys_leave_history_alone() {
        let (mut a, _b, _) = pair_of_contexts();
        let before = a.remembered_mac_keys();

        let keys = a.session_keys(1, 1).unwrap();
        assert_eq!(a.remembered_mac_keys(), before);

        a.remember_receiving_mac(1, 1, &keys);
        a.remember_receiving_mac(1, 1, &keys);
        assert_eq!(a.remembered_mac_keys(), before + 1);

        a.calculate_dh_session_keys(2, 1).unwrap();
        assert_eq!(a.remembered_mac_keys(), before + 2);
    }
}
