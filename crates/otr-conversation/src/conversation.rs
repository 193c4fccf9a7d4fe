// ============================================
// File: crates/otr-conversation/src/conversation.rs
// ============================================
//! # Conversation
//!
//! ## Creation Reason
//! Owns every piece of per-peer protocol state and exposes the one
//! mutation path the application uses: send and receive.
//!
//! ## Main Functionality
//! - `Conversation`: AKE, key management, SMP and the data codec behind
//!   `start_ake` / `send` / `receive`
//! - `MessageState`: `Plaintext | Encrypted | Finished`
//! - `Received`: decrypted text plus the wire messages to send back
//!
//! ## Message State Machine
//! ```text
//! ┌───────────┐   AKE completes    ┌───────────┐
//! │ Plaintext │ ─────────────────► │ Encrypted │ ◄── re-key (StillSecure)
//! └───────────┘                    └─────┬─────┘
//!       ▲                                │
//!       │ end()                 TLV 1    │     end()
//!       │          ┌──────────┐  from    │   (GoneInsecure)
//!       └───────── │ Finished │ ◄─ peer ─┘ ──────────► Plaintext
//!                  └──────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every method takes `&mut self`; wrap in `SharedConversation` to share
//!   between threads
//! - Wire bytes are binary OTR messages; base64 armour, fragmentation and
//!   query strings belong to the transport
//! - Key material is wiped whenever the session leaves `Encrypted`
//!
//! ## Last Modified
//! v0.1.0 - Initial conversation driver

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, Bytes};
use rand::RngCore;
use tracing::{debug, info, trace, warn};

use otr_common::time::Heartbeat;
use otr_common::types::{Fingerprint, InstanceTag, Ssid};
use otr_core::ake::{AkeCompletion, AkeContext, AuthStateKind};
use otr_core::crypto::kdf::smp_secret;
use otr_core::crypto::{IdentityKeyPair, WideKey};
use otr_core::error::{CoreError, ErrorKind};
use otr_core::protocol::{
    decode_message, encode_message, DataMessage, MessageBody, MessageHeader, OtrMessage,
    Plaintext, ProtocolVersion, Tlv, TlvType, FLAG_IGNORE_UNREADABLE,
};
use otr_core::session::{DataMessageCodec, DecryptedMessage, KeyManagementContext};
use otr_core::smp::{SmpContext, SmpStateKind};

use crate::config::ConversationConfig;
use crate::error::{ConversationError, Result};
use crate::events::{EventHandler, MessageEvent, SecurityEvent};

// ============================================
// MessageState
// ============================================

/// Whether messages are currently encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// No session; messages go out in the clear.
    Plaintext,
    /// An AKE completed; messages are encrypted.
    Encrypted,
    /// The peer ended the session; sending is refused until `end()`.
    Finished,
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plaintext => "MSGSTATE_PLAINTEXT",
            Self::Encrypted => "MSGSTATE_ENCRYPTED",
            Self::Finished => "MSGSTATE_FINISHED",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Conversation::receive`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Received {
    /// Decrypted application text, if the message carried any
    pub plaintext: Option<Vec<u8>>,
    /// Wire messages to send to the peer, in order
    pub to_send: Vec<Vec<u8>>,
}

/// What the current session authenticated.
#[derive(Debug, Clone, Copy)]
struct SessionInfo {
    ssid: Ssid,
    their_fingerprint: Fingerprint,
}

// ============================================
// Conversation
// ============================================

/// One encrypted conversation with one peer instance.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use otr_conversation::{Conversation, ConversationConfig, NoopEventHandler};
/// use otr_core::crypto::IdentityKeyPair;
/// use rand::rngs::OsRng;
///
/// let mut alice = Conversation::new(
///     IdentityKeyPair::generate(&mut OsRng),
///     ConversationConfig::default(),
///     Box::new(OsRng),
///     Arc::new(NoopEventHandler),
/// ).unwrap();
/// let mut bob = Conversation::new(
///     IdentityKeyPair::generate(&mut OsRng),
///     ConversationConfig::default(),
///     Box::new(OsRng),
///     Arc::new(NoopEventHandler),
/// ).unwrap();
///
/// let mut inbox = vec![alice.start_ake().unwrap()];
/// let mut for_bob = true;
/// while let Some(wire) = inbox.pop() {
///     let side = if for_bob { &mut bob } else { &mut alice };
///     inbox.extend(side.receive(&wire).unwrap().to_send);
///     for_bob = !for_bob;
/// }
/// assert!(alice.is_encrypted() && bob.is_encrypted());
///
/// let wire = alice.send(b"hello").unwrap();
/// assert_eq!(bob.receive(&wire).unwrap().plaintext.as_deref(), Some(&b"hello"[..]));
/// ```
pub struct Conversation {
    identity: IdentityKeyPair,
    config: ConversationConfig,
    version: ProtocolVersion,
    our_tag: InstanceTag,
    their_tag: InstanceTag,
    state: MessageState,
    ake: AkeContext,
    keys: KeyManagementContext,
    smp: SmpContext,
    codec: DataMessageCodec,
    session: Option<SessionInfo>,
    heartbeat: Heartbeat,
    rng: Box<dyn RngCore + Send>,
    events: Arc<dyn EventHandler>,
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("version", &self.version)
            .field("our_tag", &self.our_tag)
            .field("their_tag", &self.their_tag)
            .field("state", &self.state)
            .field("ake", &self.ake.state_kind())
            .field("smp", &self.smp.state_kind())
            .finish_non_exhaustive()
    }
}

impl Conversation {
    /// Creates a conversation in `Plaintext`.
    ///
    /// # Errors
    /// - `Config` if `config` fails validation
    /// - `Common` if no instance tag is configured and `rng` fails
    pub fn new(
        identity: IdentityKeyPair,
        config: ConversationConfig,
        mut rng: Box<dyn RngCore + Send>,
        events: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let our_tag = match config.instance_tag {
            Some(tag) => InstanceTag::new(tag)?,
            None => InstanceTag::generate(&mut *rng)?,
        };
        debug!(instance_tag = %our_tag, "conversation created");

        Ok(Self {
            identity,
            version: config.protocol_version,
            heartbeat: Heartbeat::new(config.heartbeat_interval()),
            config,
            our_tag,
            their_tag: InstanceTag::ZERO,
            state: MessageState::Plaintext,
            ake: AkeContext::new(),
            keys: KeyManagementContext::new(),
            smp: SmpContext::new(),
            codec: DataMessageCodec::default(),
            session: None,
            rng,
            events,
        })
    }

    // ========================================
    // Accessors
    // ========================================

    /// Current message state.
    #[must_use]
    pub const fn message_state(&self) -> MessageState {
        self.state
    }

    /// Returns `true` while messages are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.state == MessageState::Encrypted
    }

    /// Protocol version in use.
    #[must_use]
    pub const fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// Our instance tag.
    #[must_use]
    pub const fn our_instance_tag(&self) -> InstanceTag {
        self.our_tag
    }

    /// The peer's instance tag, zero until learnt.
    #[must_use]
    pub const fn their_instance_tag(&self) -> InstanceTag {
        self.their_tag
    }

    /// Session id of the current session.
    #[must_use]
    pub fn ssid(&self) -> Option<Ssid> {
        self.session.map(|s| s.ssid)
    }

    /// Our long-term key fingerprint.
    #[must_use]
    pub fn our_fingerprint(&self) -> Fingerprint {
        self.identity.fingerprint()
    }

    /// Fingerprint the peer authenticated with in the current session.
    #[must_use]
    pub fn their_fingerprint(&self) -> Option<Fingerprint> {
        self.session.map(|s| s.their_fingerprint)
    }

    /// AKE state.
    #[must_use]
    pub const fn ake_state(&self) -> AuthStateKind {
        self.ake.state_kind()
    }

    /// SMP state.
    #[must_use]
    pub const fn smp_state(&self) -> SmpStateKind {
        self.smp.state_kind()
    }

    /// The peer's SMP question while a secret is requested.
    #[must_use]
    pub fn smp_question(&self) -> Option<&str> {
        self.smp.question()
    }

    /// Key generations and counters.
    #[must_use]
    pub const fn key_management(&self) -> &KeyManagementContext {
        &self.keys
    }

    // ========================================
    // Sending
    // ========================================

    /// Starts (or restarts) the AKE and returns the DH-Commit to send.
    ///
    /// # Errors
    /// Returns `Core(ShortRandomRead)` if the random source fails.
    pub fn start_ake(&mut self) -> Result<Vec<u8>> {
        let version = self.config.protocol_version;
        let commit = self.ake.dh_commit_message(&mut *self.rng)?;
        info!(version = version.as_u16(), "AKE started");
        Ok(self.encode(version, MessageBody::DhCommit(commit), Instant::now()))
    }

    /// Prepares `message` for the peer.
    ///
    /// Encrypts while `Encrypted`; otherwise returns the text unchanged for
    /// sending in the clear, unless policy requires encryption.
    ///
    /// # Errors
    /// - `EncryptionRequired` in `Plaintext` when policy requires encryption
    /// - `ConversationFinished` in `Finished`
    /// - `Core(MalformedMessage)` if `message` contains a NUL byte
    pub fn send(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        match self.state {
            MessageState::Plaintext if self.config.policy.require_encryption => {
                Err(ConversationError::EncryptionRequired)
            }
            MessageState::Plaintext => Ok(message.to_vec()),
            MessageState::Finished => Err(ConversationError::ConversationFinished),
            MessageState::Encrypted => {
                self.send_plaintext(&Plaintext::message(message), 0, Instant::now())
            }
        }
    }

    /// Starts SMP with `secret`, optionally asking `question`.
    ///
    /// # Errors
    /// - `NotEncrypted` outside `Encrypted`
    /// - `Core(ShortRandomRead)` if the random source fails
    pub fn start_smp(&mut self, secret: &[u8], question: Option<String>) -> Result<Vec<u8>> {
        let session = self.require_session()?;
        let secret = smp_secret(
            &self.identity.fingerprint(),
            &session.their_fingerprint,
            &session.ssid,
            secret,
        );
        let tlvs = self.smp.start(&secret, question, &mut *self.rng)?;
        self.send_plaintext(&Plaintext::tlvs(tlvs), FLAG_IGNORE_UNREADABLE, Instant::now())
    }

    /// Answers the peer's SMP request with our `secret`.
    ///
    /// # Errors
    /// - `NotEncrypted` outside `Encrypted`
    /// - `SmpNotAwaitingSecret` unless an SMP1 is pending
    /// - `Core(ShortRandomRead)` if the random source fails; the exchange is
    ///   dropped and the abort goes out with our next message
    pub fn provide_smp_secret(&mut self, secret: &[u8]) -> Result<Vec<u8>> {
        let session = self.require_session()?;
        if self.smp.state_kind() != SmpStateKind::WaitingForSecret {
            return Err(ConversationError::SmpNotAwaitingSecret);
        }
        let secret = smp_secret(
            &session.their_fingerprint,
            &self.identity.fingerprint(),
            &session.ssid,
            secret,
        );
        let tlv = self.smp.provide_secret(&secret, &mut *self.rng)?;
        self.send_plaintext(
            &Plaintext::tlvs(vec![tlv]),
            FLAG_IGNORE_UNREADABLE,
            Instant::now(),
        )
    }

    /// Aborts any SMP exchange and returns the abort message for the peer.
    ///
    /// # Errors
    /// Returns `NotEncrypted` outside `Encrypted`.
    pub fn abort_smp(&mut self) -> Result<Vec<u8>> {
        self.require_session()?;
        let tlv = self.smp.abort();
        self.send_plaintext(
            &Plaintext::tlvs(vec![tlv]),
            FLAG_IGNORE_UNREADABLE,
            Instant::now(),
        )
    }

    /// Announces use of the extra symmetric key and returns it.
    ///
    /// The key belongs to the session keys the announcement is sent under;
    /// the peer derives the same key on receipt.
    ///
    /// # Errors
    /// Returns `NotEncrypted` outside `Encrypted`.
    pub fn use_extra_symmetric_key(
        &mut self,
        usage: u32,
        usedata: &[u8],
    ) -> Result<(WideKey, Vec<u8>)> {
        self.require_session()?;
        let (our_id, their_id) = self.keys.sending_key_ids();
        let key = self
            .keys
            .calculate_dh_session_keys(our_id, their_id)?
            .extra_key
            .clone();

        let mut value = Vec::with_capacity(4 + usedata.len());
        value.extend_from_slice(&usage.to_be_bytes());
        value.extend_from_slice(usedata);
        let wire = self.send_plaintext(
            &Plaintext::tlvs(vec![Tlv::new(TlvType::ExtraSymmetricKey, value)]),
            FLAG_IGNORE_UNREADABLE,
            Instant::now(),
        )?;
        debug!(usage, "extra symmetric key announced");
        Ok((key, wire))
    }

    /// Ends the session.
    ///
    /// While `Encrypted`, returns the disconnect message for the peer and
    /// wipes all session keys. From `Finished`, just returns to `Plaintext`.
    ///
    /// # Errors
    /// Returns `Core(..)` if the disconnect message cannot be built.
    pub fn end(&mut self) -> Result<Option<Vec<u8>>> {
        match self.state {
            MessageState::Encrypted => {
                let wire = self.send_plaintext(
                    &Plaintext::tlvs(vec![Tlv::empty(TlvType::Disconnected)]),
                    FLAG_IGNORE_UNREADABLE,
                    Instant::now(),
                )?;
                self.tear_down(MessageState::Plaintext);
                info!("conversation ended locally");
                self.events.security_event(SecurityEvent::GoneInsecure);
                Ok(Some(wire))
            }
            MessageState::Finished => {
                self.state = MessageState::Plaintext;
                Ok(None)
            }
            MessageState::Plaintext => Ok(None),
        }
    }

    // ========================================
    // Receiving
    // ========================================

    /// Processes one wire message from the peer.
    ///
    /// # Errors
    /// - `MessageTooLarge` above the configured limit
    /// - `WrongInstance` for a message addressed to another instance
    /// - `Core(..)` for malformed input, protocol violations (the affected
    ///   AKE is reset) and replays; the conversation stays usable
    pub fn receive(&mut self, wire: &[u8]) -> Result<Received> {
        self.receive_at(wire, Instant::now())
    }

    /// [`receive`](Self::receive) with an explicit clock for heartbeats.
    ///
    /// # Errors
    /// As [`receive`](Self::receive).
    pub fn receive_at(&mut self, wire: &[u8], now: Instant) -> Result<Received> {
        if wire.len() > self.config.max_message_size {
            return Err(ConversationError::MessageTooLarge {
                size: wire.len(),
                limit: self.config.max_message_size,
            });
        }

        let msg = match decode_message(wire) {
            Ok(msg) => msg,
            Err(CoreError::UnknownMessageType(message_type)) => {
                debug!(message_type, "unrecognized message type");
                self.events.message_event(MessageEvent::ReceivedUnrecognized);
                return Ok(Received::default());
            }
            Err(e) => return Err(e.into()),
        };
        self.check_header(&msg.header)?;

        match &msg.body {
            MessageBody::Data(data) => self.receive_data(&msg.header, data, now),
            body => self.receive_ake(&msg.header, body, now),
        }
    }

    fn check_header(&self, header: &MessageHeader) -> Result<()> {
        if !self.config.policy.allows(header.version) {
            return Err(CoreError::UnsupportedVersion(header.version.as_u16()).into());
        }
        if !header.version.has_instance_tags() {
            return Ok(());
        }
        if !header.receiver_tag.is_zero() && header.receiver_tag != self.our_tag {
            debug!(
                receiver = %header.receiver_tag,
                ours = %self.our_tag,
                "message for another instance"
            );
            return Err(ConversationError::WrongInstance {
                received: header.receiver_tag,
                ours: self.our_tag,
            });
        }
        if !header.sender_tag.is_valid() {
            return Err(CoreError::malformed("sender instance tag in reserved range").into());
        }
        Ok(())
    }

    fn receive_ake(
        &mut self,
        header: &MessageHeader,
        body: &MessageBody,
        now: Instant,
    ) -> Result<Received> {
        // The session version only follows the header once the AKE authenticates.
        let version = header.version;
        if version.has_instance_tags() && self.their_tag.is_zero() {
            self.their_tag = header.sender_tag;
            debug!(their_tag = %self.their_tag, "peer instance tag learnt");
        }

        let output = self
            .ake
            .receive(body, &self.identity, &mut *self.rng)
            .inspect_err(|e| warn!(error = %e, "AKE message rejected"))?;

        let mut received = Received::default();
        if let Some(reply) = output.reply {
            received.to_send.push(self.encode(version, reply, now));
        }
        if let Some(completion) = output.completion {
            self.version = version;
            self.go_encrypted(completion)?;
        }
        Ok(received)
    }

    fn go_encrypted(&mut self, completion: AkeCompletion) -> Result<()> {
        let AkeCompletion {
            ssid,
            our_dh,
            their_dh,
            their_key_id,
            their_identity,
            ..
        } = completion;
        self.keys
            .install(our_dh, their_dh, their_key_id, &mut *self.rng)?;

        let previous = self.state;
        self.session = Some(SessionInfo {
            ssid,
            their_fingerprint: their_identity.fingerprint(),
        });
        self.smp = SmpContext::new();
        self.state = MessageState::Encrypted;
        info!(%ssid, "conversation encrypted");

        let event = if previous == MessageState::Encrypted {
            SecurityEvent::StillSecure
        } else {
            SecurityEvent::GoneSecure
        };
        self.events.security_event(event);
        Ok(())
    }

    fn receive_data(
        &mut self,
        header: &MessageHeader,
        data: &DataMessage,
        now: Instant,
    ) -> Result<Received> {
        if self.state != MessageState::Encrypted {
            debug!(state = %self.state, "data message without a session");
            self.report_unreadable(data.ignore_unreadable());
            return Ok(Received::default());
        }

        let decrypted = match self
            .codec
            .process_data_message(&mut self.keys, header, data, &mut *self.rng)
        {
            Ok(decrypted) => decrypted,
            Err(err) => {
                warn!(error = %err, "data message rejected");
                if matches!(err.kind(), ErrorKind::ProtocolViolation | ErrorKind::Malformed) {
                    self.report_unreadable(data.ignore_unreadable());
                }
                return Err(err.into());
            }
        };
        let DecryptedMessage {
            plaintext: Plaintext { message, tlvs },
            extra_key,
            ..
        } = decrypted;

        if message.is_empty() && tlvs.iter().all(|t| t.tlv_type == TlvType::Padding) {
            trace!("heartbeat received");
            self.events.message_event(MessageEvent::HeartbeatReceived);
        }

        let mut replies = Vec::new();
        for tlv in &tlvs {
            match tlv.tlv_type {
                TlvType::Disconnected => {
                    self.tear_down(MessageState::Finished);
                    info!("conversation ended by peer");
                    self.events.security_event(SecurityEvent::ConversationEnded);
                    break;
                }
                t if t.is_smp() => {
                    let step = self.smp.receive(tlv, &mut *self.rng);
                    replies.extend(step.reply);
                    if let Some(event) = step.event {
                        self.events.smp_event(event);
                    }
                }
                TlvType::ExtraSymmetricKey => self.extra_key_received(tlv, &extra_key),
                other => trace!(tlv_type = other.as_u16(), "TLV ignored"),
            }
        }

        let mut received = Received {
            plaintext: (!message.is_empty()).then_some(message),
            to_send: Vec::new(),
        };
        if self.state == MessageState::Encrypted {
            if !replies.is_empty() {
                let wire =
                    self.send_plaintext(&Plaintext::tlvs(replies), FLAG_IGNORE_UNREADABLE, now)?;
                received.to_send.push(wire);
            } else if self.config.policy.send_heartbeats && self.heartbeat.due_at(now) {
                let wire = self.send_plaintext(&Plaintext::default(), FLAG_IGNORE_UNREADABLE, now)?;
                received.to_send.push(wire);
                debug!("heartbeat sent");
                self.events.message_event(MessageEvent::HeartbeatSent);
            }
        }
        Ok(received)
    }

    fn extra_key_received(&self, tlv: &Tlv, key: &WideKey) {
        let mut value = Bytes::copy_from_slice(&tlv.value);
        if value.remaining() < 4 {
            warn!(len = value.len(), "extra symmetric key TLV too short");
            return;
        }
        let usage = value.get_u32();
        debug!(usage, "extra symmetric key received");
        self.events.message_event(MessageEvent::ExtraKeyReceived {
            key: key.clone(),
            usage,
            usedata: value.to_vec(),
        });
    }

    // ========================================
    // Helpers
    // ========================================

    fn require_session(&self) -> Result<SessionInfo> {
        match (self.state, self.session) {
            (MessageState::Encrypted, Some(session)) => Ok(session),
            (state, _) => Err(ConversationError::NotEncrypted { state }),
        }
    }

    fn report_unreadable(&self, ignore_unreadable: bool) {
        if !ignore_unreadable {
            self.events.message_event(MessageEvent::ReceivedUnreadable);
        }
    }

    const fn sender_tag(&self, version: ProtocolVersion) -> InstanceTag {
        if version.has_instance_tags() {
            self.our_tag
        } else {
            InstanceTag::ZERO
        }
    }

    const fn receiver_tag(&self, version: ProtocolVersion) -> InstanceTag {
        if version.has_instance_tags() {
            self.their_tag
        } else {
            InstanceTag::ZERO
        }
    }

    fn encode(&mut self, version: ProtocolVersion, body: MessageBody, now: Instant) -> Vec<u8> {
        let msg = OtrMessage::new(version, self.sender_tag(version), self.receiver_tag(version), body);
        self.heartbeat.record_sent_at(now);
        encode_message(&msg).to_vec()
    }

    fn send_plaintext(&mut self, plaintext: &Plaintext, flags: u8, now: Instant) -> Result<Vec<u8>> {
        // An SMP abort owed after a local failure rides on the next message.
        let with_abort;
        let plaintext = match self.smp.take_pending_abort() {
            Some(abort) => {
                let mut owned = plaintext.clone();
                owned.tlvs.insert(0, abort);
                with_abort = owned;
                &with_abort
            }
            None => plaintext,
        };
        let (sender, receiver) = (self.sender_tag(self.version), self.receiver_tag(self.version));
        let msg = self.codec.create_data_message(
            &mut self.keys,
            self.version,
            sender,
            receiver,
            plaintext,
            flags,
        )?;
        self.heartbeat.record_sent_at(now);
        Ok(encode_message(&msg).to_vec())
    }

    fn tear_down(&mut self, next: MessageState) {
        self.keys.wipe();
        self.ake.reset();
        self.smp = SmpContext::new();
        self.session = None;
        self.heartbeat.reset();
        self.state = next;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, RecordingEventHandler};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn party(seed: u64, config: ConversationConfig) -> (Conversation, Arc<RecordingEventHandler>) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let identity = IdentityKeyPair::generate(&mut rng);
        let events = Arc::new(RecordingEventHandler::new());
        let conv = Conversation::new(identity, config, Box::new(rng), events.clone()).unwrap();
        (conv, events)
    }

    #[test]
    fn test_new_conversation_is_plaintext() {
        let (conv, _) = party(1, ConversationConfig::default());
        assert_eq!(conv.message_state(), MessageState::Plaintext);
        assert!(conv.our_instance_tag().is_valid());
        assert!(conv.their_instance_tag().is_zero());
        assert!(conv.ssid().is_none());
    }

    #[test]
    fn test_configured_instance_tag() {
        let config = ConversationConfig {
            instance_tag: Some(0x4242),
            ..ConversationConfig::default()
        };
        let (conv, _) = party(2, config);
        assert_eq!(conv.our_instance_tag().value(), 0x4242);
    }

    #[test]
    fn test_plaintext_send_passes_through() {
        let (mut conv, _) = party(3, ConversationConfig::default());
        assert_eq!(conv.send(b"hi").unwrap(), b"hi".to_vec());
    }

    #[test]
    fn test_plaintext_send_refused_when_required() {
        let mut config = ConversationConfig::default();
        config.policy.require_encryption = true;
        let (mut conv, _) = party(4, config);
        assert_eq!(conv.send(b"hi"), Err(ConversationError::EncryptionRequired));
    }

    #[test]
    fn test_smp_requires_session() {
        let (mut conv, _) = party(5, ConversationConfig::default());
        assert_eq!(
            conv.start_smp(b"secret", None),
            Err(ConversationError::NotEncrypted {
                state: MessageState::Plaintext
            })
        );
        assert!(conv.use_extra_symmetric_key(1, b"").is_err());
    }

    #[test]
    fn test_start_ake_produces_commit() {
        let (mut conv, _) = party(6, ConversationConfig::default());
        let wire = conv.start_ake().unwrap();
        let msg = decode_message(&wire).unwrap();
        assert!(matches!(msg.body, MessageBody::DhCommit(_)));
        assert_eq!(msg.header.sender_tag, conv.our_instance_tag());
        assert!(msg.header.receiver_tag.is_zero());
        assert_eq!(conv.ake_state(), AuthStateKind::AwaitingDhKey);
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        let (mut conv, events) = party(7, ConversationConfig::default());
        let wire = [0x00, 0x03, 0x7f, 0, 0, 1, 0, 0, 0, 0, 0];
        let received = conv.receive(&wire).unwrap();
        assert_eq!(received, Received::default());
        assert!(events.contains(&Event::Message(MessageEvent::ReceivedUnrecognized)));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let (mut conv, _) = party(8, ConversationConfig::default());
        let wire = vec![0u8; 64 * 1024 + 1];
        assert!(matches!(
            conv.receive(&wire),
            Err(ConversationError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_wrong_receiver_tag_rejected() {
        let (mut alice, _) = party(9, ConversationConfig::default());
        let (mut bob, _) = party(10, ConversationConfig::default());
        let commit = alice.start_ake().unwrap();
        let mut msg = decode_message(&commit).unwrap();
        msg.header.receiver_tag = InstanceTag::from_wire(0x9999_9999);
        let wire = encode_message(&msg).to_vec();

        let err = bob.receive(&wire).unwrap_err();
        assert!(matches!(err, ConversationError::WrongInstance { .. }));
        assert!(err.is_droppable());
    }

    #[test]
    fn test_disabled_version_rejected() {
        let (mut alice, _) = party(11, ConversationConfig::default());
        let (mut bob, _) = party(12, ConversationConfig::default());
        let commit = alice.start_ake().unwrap();
        let mut msg = decode_message(&commit).unwrap();
        msg.header.version = ProtocolVersion::V2;
        msg.header.sender_tag = InstanceTag::ZERO;
        msg.header.receiver_tag = InstanceTag::ZERO;
        let wire = encode_message(&msg).to_vec();

        assert_eq!(
            bob.receive(&wire),
            Err(ConversationError::Core(CoreError::UnsupportedVersion(2)))
        );
    }
}
