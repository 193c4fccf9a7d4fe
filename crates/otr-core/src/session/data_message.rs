// ============================================
// File: crates/otr-core/src/session/data_message.rs
// ============================================
//! # Data Message Encryption
//!
//! ## Creation Reason
//! Turns plaintext plus TLVs into authenticated data messages and back,
//! driving key rotation and replay protection on the way.
//!
//! ## Receive Order
//! ```text
//! 1. derive keys for (recipient id, sender id)   unknown id ──► conflict
//! 2. verify MAC (constant time)                  mismatch   ──► BadMac
//! 3. remember the receiving MAC key for later disclosure
//! 4. validate next_dh, pre-generate our next key if we will rotate
//! 5. decrypt and split message / TLVs            corrupt    ──► MalformedTlv
//! 6. check and advance the counter               stale      ──► replay
//! 7. rotate our keys and theirs
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Nothing in `KeyManagementContext` changes before step 2 passes
//! - The counter and the key generations move only after the payload
//!   decodes, so a rejected message can be retransmitted
//! - Randomness is drawn before the counter moves so a short read leaves
//!   the counter untouched
//!
//! ## Last Modified
//! v0.1.0 - Initial data message codec

use rand::RngCore;
use tracing::{debug, trace};
use zeroize::Zeroize;

use otr_common::types::InstanceTag;

use super::key_management::KeyManagementContext;
use crate::crypto::group;
use crate::crypto::kdf::WideKey;
use crate::crypto::keys::DhKeyPair;
use crate::crypto::transport::{DefaultTransportCrypto, TransportCrypto};
use crate::error::{CoreError, Result};
use crate::protocol::codec::data_message_mac_input;
use crate::protocol::{
    DataMessage, MessageBody, MessageHeader, MessageType, OtrMessage, Plaintext, ProtocolVersion,
};

// ============================================
// DecryptedMessage
// ============================================

/// A verified and decrypted data message.
#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    /// Message and TLVs
    pub plaintext: Plaintext,
    /// Extra symmetric key of the session keys this message used
    pub extra_key: WideKey,
    /// Whether the sender set `IGNORE_UNREADABLE`
    pub ignore_unreadable: bool,
}

// ============================================
// DataMessageCodec
// ============================================

/// Encrypts and decrypts data messages.
///
/// Generic over [`TransportCrypto`] so the cipher and MAC can be swapped
/// in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataMessageCodec<C = DefaultTransportCrypto> {
    crypto: C,
}

impl<C: TransportCrypto> DataMessageCodec<C> {
    /// Creates a codec using `crypto`.
    pub const fn new(crypto: C) -> Self {
        Self { crypto }
    }

    /// Encrypts `plaintext` under the current sending keys.
    ///
    /// Uses our previous generation and the peer's current one, advertises
    /// our current public value and discloses any pending MAC keys.
    ///
    /// # Errors
    /// - `InvalidState` if no session is installed
    /// - `MalformedMessage` if the message text contains NUL
    /// - `MalformedTlv` if a TLV value is too long
    pub fn create_data_message(
        &self,
        keys: &mut KeyManagementContext,
        version: ProtocolVersion,
        sender_tag: InstanceTag,
        receiver_tag: InstanceTag,
        plaintext: &Plaintext,
        flags: u8,
    ) -> Result<OtrMessage> {
        let payload = plaintext.encode()?;
        self.seal(keys, version, sender_tag, receiver_tag, payload, flags)
    }

    fn seal(
        &self,
        keys: &mut KeyManagementContext,
        version: ProtocolVersion,
        sender_tag: InstanceTag,
        receiver_tag: InstanceTag,
        mut encrypted_message: Vec<u8>,
        flags: u8,
    ) -> Result<OtrMessage> {
        let next_dh = keys
            .our_current_public()
            .cloned()
            .ok_or_else(|| CoreError::invalid_state("send data message", "established session"))?;
        let (our_id, their_id) = keys.sending_key_ids();
        let session = keys.calculate_dh_session_keys(our_id, their_id)?;

        let top_half_counter = keys.next_counter();
        self.crypto
            .apply_ctr(&session.sending_aes, &top_half_counter, &mut encrypted_message);

        let header = MessageHeader::new(version, MessageType::Data, sender_tag, receiver_tag);
        let mut msg = DataMessage {
            flags,
            sender_key_id: our_id,
            recipient_key_id: their_id,
            next_dh,
            top_half_counter,
            encrypted_message,
            mac: [0u8; 20],
            old_mac_keys: keys.take_old_mac_keys(),
        };
        msg.mac = self
            .crypto
            .mac(&session.sending_mac, &data_message_mac_input(&header, &msg));

        trace!(
            sender_key_id = our_id,
            recipient_key_id = their_id,
            counter = u64::from_be_bytes(top_half_counter),
            "data message created"
        );
        Ok(OtrMessage {
            header,
            body: MessageBody::Data(msg),
        })
    }

    /// Verifies, decrypts and applies an incoming data message.
    ///
    /// # Errors
    /// - `UnknownKeyId` if a key id is neither current nor previous
    /// - `BadMac` if authentication fails; no state changes then
    /// - `InvalidGroupElement` for an out-of-range `next_dh`
    /// - `ShortRandomRead` if our next key cannot be generated
    /// - `MalformedTlv` if the decrypted TLV tail is corrupt; the counter
    ///   does not move
    /// - `CounterReplay` for a counter that did not advance
    pub fn process_data_message(
        &self,
        keys: &mut KeyManagementContext,
        header: &MessageHeader,
        msg: &DataMessage,
        rng: &mut dyn RngCore,
    ) -> Result<DecryptedMessage> {
        if !keys.is_established() {
            return Err(CoreError::invalid_state(
                "process data message",
                "established session",
            ));
        }

        let session = keys.session_keys(msg.recipient_key_id, msg.sender_key_id)?;

        self.crypto.verify(
            &session.receiving_mac,
            &data_message_mac_input(header, msg),
            &msg.mac,
        )?;
        keys.remember_receiving_mac(msg.recipient_key_id, msg.sender_key_id, &session);

        group::check_group_element(&msg.next_dh, "next DH value")?;
        let next_pair = if keys.needs_our_rotation(msg.recipient_key_id) {
            Some(DhKeyPair::generate(rng)?)
        } else {
            None
        };

        let mut decrypted = msg.encrypted_message.clone();
        self.crypto
            .apply_ctr(&session.receiving_aes, &msg.top_half_counter, &mut decrypted);
        let plaintext = Plaintext::decode(&decrypted);
        decrypted.zeroize();
        let plaintext = plaintext?;

        keys.check_message_counter(msg.counter())?;

        if let Some(next) = next_pair {
            keys.rotate_our_keys(msg.recipient_key_id, next);
        }
        keys.rotate_their_key(msg.sender_key_id, msg.next_dh.clone())?;

        debug!(
            sender_key_id = msg.sender_key_id,
            recipient_key_id = msg.recipient_key_id,
            tlvs = plaintext.tlvs.len(),
            "data message accepted"
        );
        Ok(DecryptedMessage {
            plaintext,
            extra_key: session.extra_key.clone(),
            ignore_unreadable: msg.ignore_unreadable(),
        })
    }
}

// ============================================
// Tests
// ============================================
