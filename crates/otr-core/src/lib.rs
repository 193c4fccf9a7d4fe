// ============================================
// File: crates/otr-core/src/lib.rs
// ============================================
//! # OTR Core - Protocol & Cryptography Library
//!
//! ## Creation Reason
//! Implements the cryptographic core of Off-the-Record messaging: the
//! authenticated key exchange, per-message key rotation, the data message
//! format and the Socialist Millionaire Protocol.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - Message type definitions (DH-Commit, DH-Key, Reveal-Signature,
//!   Signature, Data)
//! - Binary codec for the wire format (SHORT/INT/MPI/DATA/CTR/MAC)
//! - TLV records and the plaintext layout
//!
//! ### Crypto Module ([`crypto`])
//! - 1536-bit MODP group arithmetic and range checks
//! - Key types (`DhKeyPair`, `IdentityKeyPair`, session keys)
//! - Key derivation (`h1`/`h2`, SMP hash and secret)
//! - Transport primitives (AES-128-CTR, HMAC-SHA1/SHA256)
//!
//! ### State Machines
//! - [`ake`]: the four-message AKE
//! - [`session`]: key generations, counters, data message encrypt/decrypt
//! - [`smp`]: SMP over TLVs 2-7
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              otr-conversation                       │
//! │                    │                                │
//! │                    ▼                                │
//! │               otr-core  ◄── You are here            │
//! │                    │                                │
//! │                    ▼                                │
//! │              otr-common                             │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Confidentiality**: AES-128-CTR under keys rotated every round trip
//! - **Integrity**: HMAC-SHA1 on every data message, checked before decrypting
//! - **Authenticity**: Ed25519 signatures inside the AKE
//! - **Forward Secrecy**: DH keys wiped once retired
//! - **Deniability**: retired MAC keys published to the peer
//! - **Replay Protection**: strictly increasing counters
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic primitives come from RustCrypto / dalek crates
//! - Every received group element passes a range check before use
//! - Secret material lives in zeroizing wrappers
//! - No function here does I/O; randomness is always injected
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ake;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod session;
pub mod smp;

pub use ake::{AkeCompletion, AkeContext, AkeOutput, AuthState, AuthStateKind, AKE_KEY_ID};
pub use crypto::{DhKeyPair, IdentityKeyPair, IdentityPublicKey};
pub use error::{CoreError, Result};
pub use protocol::{
    decode_message, encode_message, MessageBody, MessageHeader, OtrMessage, Plaintext,
    ProtocolVersion, Tlv, TlvType, CURRENT_PROTOCOL_VERSION,
};
pub use session::{DataMessageCodec, DecryptedMessage, KeyManagementContext};
pub use smp::{SmpContext, SmpEvent, SmpState, SmpStateKind, SmpStep};
