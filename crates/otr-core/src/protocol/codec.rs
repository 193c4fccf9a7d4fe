// ============================================
// File: crates/otr-core/src/protocol/codec.rs
// ============================================
//! # Protocol Codec
//!
//! ## Creation Reason
//! Provides binary serialization and deserialization for OTR messages and
//! the primitive field encodings they are built from.
//!
//! ## Main Functionality
//! - `Codec` trait: generic encode/decode interface
//! - `ProtocolCodec`: implementation for headers and whole messages
//! - `put_mpi`/`get_mpi`, `put_data`/`get_data`: field encodings
//! - `data_message_mac_input`: the bytes covered by a data message MAC
//!
//! ## Wire Format
//! All multi-byte integers are big-endian.
//! ```text
//! BYTE  = 1 byte            SHORT = 2 bytes         INT = 4 bytes
//! MPI   = INT len || len bytes of big-endian magnitude (minimal)
//! DATA  = INT len || len bytes
//! CTR   = 8 bytes           MAC   = 20 bytes
//! ```
//!
//! ## Parsing Strategy
//! 1. Read version, reject anything but 2 or 3
//! 2. Read type byte and (v3) instance tags
//! 3. Dispatch to the type-specific body parser
//! 4. Reject trailing bytes
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always check remaining length before reading
//! - Length prefixes come from the peer; never allocate before checking them
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_bigint::BigUint;

use otr_common::types::InstanceTag;

use super::messages::{
    DataMessage, DhCommit, DhKey, MessageBody, MessageHeader, MessageType, OtrMessage,
    RevealSignature, Signature,
};
use super::version::ProtocolVersion;
use crate::crypto::group::minimal_bytes;
use crate::crypto::{COMMIT_NONCE_SIZE, CTR_SIZE, MAC_SIZE, SHA256_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Codec Trait
// ============================================

/// Trait for encoding and decoding protocol messages.
///
/// # Type Parameters
/// * `T` - The message type to encode/decode
pub trait Codec<T> {
    /// Encodes a message into a byte buffer.
    fn encode(&self, msg: &T, buf: &mut BytesMut);

    /// Decodes a message from bytes.
    ///
    /// # Errors
    /// Returns a malformed-class error if the bytes do not parse.
    fn decode(&self, buf: &mut Bytes) -> Result<T>;
}

// ============================================
// Field Encodings
// ============================================

fn ensure(buf: &Bytes, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        Err(CoreError::too_short(needed, buf.remaining()))
    } else {
        Ok(())
    }
}

fn put_len(buf: &mut BytesMut, len: usize) {
    buf.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
}

/// Reads a big-endian `u8`.
pub fn get_u8(buf: &mut Bytes) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

/// Reads a big-endian `u16`.
pub fn get_u16(buf: &mut Bytes) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

/// Reads a big-endian `u32`.
pub fn get_u32(buf: &mut Bytes) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

/// Reads exactly `N` raw bytes.
pub fn get_array<const N: usize>(buf: &mut Bytes) -> Result<[u8; N]> {
    ensure(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Writes `DATA`: length prefix then bytes.
pub fn put_data(buf: &mut BytesMut, data: &[u8]) {
    put_len(buf, data.len());
    buf.put_slice(data);
}

/// Reads `DATA`.
///
/// # Errors
/// Returns `MessageTooShort` if the length prefix overruns the buffer.
pub fn get_data(buf: &mut Bytes) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    Ok(buf.split_to(len).to_vec())
}

/// Reads `DATA` that must be exactly `N` bytes long.
pub fn get_fixed_data<const N: usize>(buf: &mut Bytes, field: &str) -> Result<[u8; N]> {
    let len = get_u32(buf)? as usize;
    if len != N {
        return Err(CoreError::malformed(format!(
            "{field}: expected {N} bytes, got {len}"
        )));
    }
    get_array::<N>(buf)
}

/// Writes an `MPI`.
pub fn put_mpi(buf: &mut BytesMut, value: &BigUint) {
    let body = minimal_bytes(value);
    put_len(buf, body.len());
    buf.put_slice(&body);
}

/// Reads an `MPI`.
///
/// # Errors
/// Returns `MalformedMpi` if the length prefix overruns the buffer.
pub fn get_mpi(buf: &mut Bytes) -> Result<BigUint> {
    ensure(buf, 4).map_err(|_| CoreError::malformed_mpi("missing length prefix"))?;
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(CoreError::malformed_mpi(format!(
            "length {len} exceeds remaining {}",
            buf.remaining()
        )));
    }
    Ok(BigUint::from_bytes_be(&buf.split_to(len)))
}

// ============================================
// ProtocolCodec
// ============================================

/// Codec implementation for all OTR messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolCodec;

impl ProtocolCodec {
    /// Creates a new protocol codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses just the header, leaving the input untouched.
    ///
    /// # Errors
    /// Returns the same errors as header decoding.
    pub fn peek_header(buf: &[u8]) -> Result<MessageHeader> {
        let mut bytes = Bytes::copy_from_slice(buf);
        <Self as Codec<MessageHeader>>::decode(&Self, &mut bytes)
    }

    fn encode_body(body: &MessageBody, buf: &mut BytesMut) {
        match body {
            MessageBody::DhCommit(m) => {
                put_data(buf, &m.encrypted_gx);
                put_data(buf, &m.hashed_gx);
            }
            MessageBody::DhKey(m) => put_mpi(buf, &m.gy),
            MessageBody::RevealSignature(m) => {
                put_data(buf, &m.r);
                put_data(buf, &m.encrypted_signature);
                buf.put_slice(&m.mac);
            }
            MessageBody::Signature(m) => {
                put_data(buf, &m.encrypted_signature);
                buf.put_slice(&m.mac);
            }
            MessageBody::Data(m) => {
                encode_data_fields(m, buf);
                buf.put_slice(&m.mac);
                put_data(buf, &m.old_mac_keys);
            }
        }
    }

    fn decode_body(message_type: MessageType, buf: &mut Bytes) -> Result<MessageBody> {
        let body = match message_type {
            MessageType::DhCommit => MessageBody::DhCommit(DhCommit {
                encrypted_gx: get_data(buf)?,
                hashed_gx: get_fixed_data::<SHA256_SIZE>(buf, "hashed g^x")?,
            }),
            MessageType::DhKey => MessageBody::DhKey(DhKey { gy: get_mpi(buf)? }),
            MessageType::RevealSignature => MessageBody::RevealSignature(RevealSignature {
                r: get_fixed_data::<COMMIT_NONCE_SIZE>(buf, "revealed r")?,
                encrypted_signature: get_data(buf)?,
                mac: get_array::<MAC_SIZE>(buf)?,
            }),
            MessageType::Signature => MessageBody::Signature(Signature {
                encrypted_signature: get_data(buf)?,
                mac: get_array::<MAC_SIZE>(buf)?,
            }),
            MessageType::Data => MessageBody::Data(DataMessage {
                flags: get_u8(buf)?,
                sender_key_id: get_u32(buf)?,
                recipient_key_id: get_u32(buf)?,
                next_dh: get_mpi(buf)?,
                top_half_counter: get_array::<CTR_SIZE>(buf)?,
                encrypted_message: get_data(buf)?,
                mac: get_array::<MAC_SIZE>(buf)?,
                old_mac_keys: get_data(buf)?,
            }),
        };
        Ok(body)
    }
}

// ============================================
// MessageHeader Codec
// ============================================

impl Codec<MessageHeader> for ProtocolCodec {
    fn encode(&self, msg: &MessageHeader, buf: &mut BytesMut) {
        buf.put_u16(msg.version.as_u16());
        buf.put_u8(msg.message_type.as_byte());
        if msg.version.has_instance_tags() {
            buf.put_u32(msg.sender_tag.value());
            buf.put_u32(msg.receiver_tag.value());
        }
    }

    fn decode(&self, buf: &mut Bytes) -> Result<MessageHeader> {
        let version = ProtocolVersion::from_u16(get_u16(buf)?)?;
        let type_byte = get_u8(buf)?;
        let message_type =
            MessageType::from_byte(type_byte).ok_or(CoreError::UnknownMessageType(type_byte))?;
        let (sender_tag, receiver_tag) = if version.has_instance_tags() {
            (
                InstanceTag::from_wire(get_u32(buf)?),
                InstanceTag::from_wire(get_u32(buf)?),
            )
        } else {
            (InstanceTag::ZERO, InstanceTag::ZERO)
        };
        Ok(MessageHeader::new(version, message_type, sender_tag, receiver_tag))
    }
}

// ============================================
// OtrMessage Codec
// ============================================

impl Codec<OtrMessage> for ProtocolCodec {
    fn encode(&self, msg: &OtrMessage, buf: &mut BytesMut) {
        <Self as Codec<MessageHeader>>::encode(self, &msg.header, buf);
        Self::encode_body(&msg.body, buf);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<OtrMessage> {
        let header = <Self as Codec<MessageHeader>>::decode(self, buf)?;
        let body = Self::decode_body(header.message_type, buf)?;
        if buf.has_remaining() {
            return Err(CoreError::malformed(format!(
                "{} trailing bytes after {}",
                buf.remaining(),
                header.message_type
            )));
        }
        Ok(OtrMessage { header, body })
    }
}

fn encode_data_fields(msg: &DataMessage, buf: &mut BytesMut) {
    buf.put_u8(msg.flags);
    buf.put_u32(msg.sender_key_id);
    buf.put_u32(msg.recipient_key_id);
    put_mpi(buf, &msg.next_dh);
    buf.put_slice(&msg.top_half_counter);
    put_data(buf, &msg.encrypted_message);
}

// ============================================
// Convenience Functions
// ============================================

/// Encodes a message to bytes.
#[must_use]
pub fn encode_message(msg: &OtrMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    ProtocolCodec.encode(msg, &mut buf);
    buf
}

/// Decodes a message from bytes.
///
/// # Errors
/// Returns a malformed-class error, `UnsupportedVersion` or
/// `UnknownMessageType`.
pub fn decode_message(buf: &[u8]) -> Result<OtrMessage> {
    let mut bytes = Bytes::copy_from_slice(buf);
    ProtocolCodec.decode(&mut bytes)
}

/// The bytes a data message MAC covers: header through the encrypted
/// message, exactly as they appear on the wire.
#[must_use]
pub fn data_message_mac_input(header: &MessageHeader, msg: &DataMessage) -> Vec<u8> {
    let mut buf = BytesMut::new();
    <ProtocolCodec as Codec<MessageHeader>>::encode(&ProtocolCodec, header, &mut buf);
    encode_data_fields(msg, &mut buf);
    buf.to_vec()
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v3_message(body: MessageBody) -> OtrMessage {
        OtrMessage::new(
            ProtocolVersion::V3,
            InstanceTag::from_wire(0x0000_0101),
            InstanceTag::from_wire(0x0000_0202),
            body,
        )
    }

    fn sample_data_message() -> DataMessage {
        DataMessage {
            flags: 0,
            sender_key_id: 1,
            recipient_key_id: 2,
            next_dh: BigUint::from(0x1234_5678u32),
            top_half_counter: 1u64.to_be_bytes(),
            encrypted_message: vec![0xaa; 5],
            mac: [0x55; MAC_SIZE],
            old_mac_keys: vec![0x77; 20],
        }
    }

    #[test]
    fn test_header_layout() {
        let msg = v3_message(MessageBody::DhKey(DhKey {
            gy: BigUint::from(0x0102u32),
        }));
        let encoded = encode_message(&msg);
        assert_eq!(
            &encoded[..],
            &[
                0x00, 0x03, 0x0a, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x02, 0x02, // header
                0x00, 0x00, 0x00, 0x02, 0x01, 0x02, // MPI
            ]
        );
    }

    #[test]
    fn test_v2_header_has_no_tags() {
        let msg = OtrMessage::new(
            ProtocolVersion::V2,
            InstanceTag::ZERO,
            InstanceTag::ZERO,
            MessageBody::DhKey(DhKey {
                gy: BigUint::from(2u32),
            }),
        );
        let encoded = encode_message(&msg);
        assert_eq!(&encoded[..3], &[0x00, 0x02, 0x0a]);
        assert_eq!(decode_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_data_message_roundtrip() {
        let msg = v3_message(MessageBody::Data(sample_data_message()));
        let encoded = encode_message(&msg);
        assert_eq!(decode_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_mac_input_is_wire_prefix() {
        let data = sample_data_message();
        let msg = v3_message(MessageBody::Data(data.clone()));
        let encoded = encode_message(&msg);
        let mac_input = data_message_mac_input(&msg.header, &data);

        assert_eq!(&encoded[..mac_input.len()], &mac_input[..]);
        assert_eq!(&encoded[mac_input.len()..mac_input.len() + MAC_SIZE], &data.mac);
    }

    #[test]
    fn test_reveal_signature_layout() {
        let msg = v3_message(MessageBody::RevealSignature(RevealSignature {
            r: [0x11; COMMIT_NONCE_SIZE],
            encrypted_signature: vec![0x22; 3],
            mac: [0x33; MAC_SIZE],
        }));
        let encoded = encode_message(&msg);
        // header, DATA(r), DATA(sig), MAC
        assert_eq!(encoded.len(), 11 + 4 + 16 + 4 + 3 + 20);
        assert_eq!(decode_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let err = decode_message(&[0x00, 0x04, 0x02]).unwrap_err();
        assert_eq!(err, CoreError::UnsupportedVersion(4));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = decode_message(&[0x00, 0x02, 0x7f]).unwrap_err();
        assert_eq!(err, CoreError::UnknownMessageType(0x7f));
    }

    #[test]
    fn test_decode_rejects_wrong_hash_length() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x00, 0x02, 0x02]);
        put_data(&mut buf, &[1, 2, 3]);
        put_data(&mut buf, &[0u8; 31]);
        let err = decode_message(&buf).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let msg = v3_message(MessageBody::DhKey(DhKey {
            gy: BigUint::from(9u32),
        }));
        let mut encoded = encode_message(&msg).to_vec();
        encoded.push(0);
        assert!(decode_message(&encoded).unwrap_err().is_malformed());
    }

    #[test]
    fn test_mpi_overrun() {
        let mut bytes = Bytes::from_static(&[0x00, 0x00, 0x00, 0x10, 0x01]);
        assert!(matches!(
            get_mpi(&mut bytes),
            Err(CoreError::MalformedMpi { .. })
        ));
    }

    #[test]
    fn test_peek_header() {
        let msg = v3_message(MessageBody::DhKey(DhKey {
            gy: BigUint::from(9u32),
        }));
        let encoded = encode_message(&msg);
        assert_eq!(ProtocolCodec::peek_header(&encoded).unwrap(), msg.header);
    }

    proptest! {
        #[test]
        fn prop_mpi_framing(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let value = BigUint::from_bytes_be(&bytes);
            let mut buf = BytesMut::new();
            put_mpi(&mut buf, &value);
            buf.put_u8(0xee);

            let mut frozen = buf.freeze();
            prop_assert_eq!(get_mpi(&mut frozen).unwrap(), value);
            // The length prefix consumed exactly the magnitude.
            prop_assert_eq!(frozen.remaining(), 1);
        }

        #[test]
        fn prop_truncated_input_never_panics(cut in 0usize..80) {
            let msg = v3_message(MessageBody::Data(sample_data_message()));
            let encoded = encode_message(&msg);
            let cut = cut.min(encoded.len() - 1);
            prop_assert!(decode_message(&encoded[..cut]).is_err());
        }
    }
}
