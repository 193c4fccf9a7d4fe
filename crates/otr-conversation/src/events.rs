// ============================================
// File: crates/otr-conversation/src/events.rs
// ============================================
//! # Conversation Events
//!
//! ## Creation Reason
//! The application learns about security changes, SMP progress and
//! protocol noise through a fire-and-forget sink rather than return
//! values.
//!
//! ## Main Functionality
//! - `SecurityEvent`, `MessageEvent`: what the conversation reports
//! - `EventHandler`: the sink trait, every method defaulted to a no-op
//! - `NoopEventHandler`, `RecordingEventHandler`: ready-made sinks
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handlers run while the conversation is borrowed (and, for
//!   `SharedConversation`, while its lock is held); never call back into
//!   the conversation from a handler
//!
//! ## Last Modified
//! v0.1.0 - Initial event definitions

use parking_lot::Mutex;

use otr_core::crypto::WideKey;
pub use otr_core::smp::SmpEvent;

// ============================================
// Event Types
// ============================================

/// Changes in the conversation's security.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// The first AKE completed.
    GoneSecure,
    /// A further AKE completed while already encrypted.
    StillSecure,
    /// We ended the encrypted session.
    GoneInsecure,
    /// The peer ended the encrypted session.
    ConversationEnded,
}

/// Protocol-level notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    /// We answered a quiet period with an empty message.
    HeartbeatSent,
    /// The peer sent an empty message.
    HeartbeatReceived,
    /// A data message we cannot read.
    ReceivedUnreadable,
    /// A message of unknown type.
    ReceivedUnrecognized,
    /// The peer announced use of the extra symmetric key.
    ExtraKeyReceived {
        /// The key, as derived from the session keys of that message
        key: WideKey,
        /// Application-defined usage code
        usage: u32,
        /// Application-defined context data
        usedata: Vec<u8>,
    },
}

/// Any event, as stored by [`RecordingEventHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// See [`SecurityEvent`]
    Security(SecurityEvent),
    /// See [`MessageEvent`]
    Message(MessageEvent),
    /// See [`SmpEvent`]
    Smp(SmpEvent),
}

// ============================================
// EventHandler
// ============================================

/// Receives conversation events.
pub trait EventHandler: Send + Sync {
    /// Called when the security of the conversation changes.
    fn security_event(&self, event: SecurityEvent) {
        let _ = event;
    }

    /// Called for protocol-level notices.
    fn message_event(&self, event: MessageEvent) {
        let _ = event;
    }

    /// Called for SMP progress.
    fn smp_event(&self, event: SmpEvent) {
        let _ = event;
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventHandler;

impl EventHandler for NoopEventHandler {}

/// Stores every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventHandler {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Returns a copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Returns `true` if `event` was recorded.
    #[must_use]
    pub fn contains(&self, event: &Event) -> bool {
        self.events.lock().contains(event)
    }
}

impl EventHandler for RecordingEventHandler {
    fn security_event(&self, event: SecurityEvent) {
        self.events.lock().push(Event::Security(event));
    }

    fn message_event(&self, event: MessageEvent) {
        self.events.lock().push(Event::Message(event));
    }

    fn smp_event(&self, event: SmpEvent) {
        self.events.lock().push(Event::Smp(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_handler() {
        let handler = RecordingEventHandler::new();
        handler.security_event(SecurityEvent::GoneSecure);
        handler.smp_event(SmpEvent::Success);

        assert!(handler.contains(&Event::Smp(SmpEvent::Success)));
        assert_eq!(handler.take().len(), 2);
        assert!(handler.events().is_empty());
    }

    #[test]
    fn test_noop_handler() {
        NoopEventHandler.message_event(MessageEvent::HeartbeatSent);
    }
}
