// ============================================
// File: crates/otr-core/src/protocol/tlv.rs
// ============================================
//! # TLV Records and Plaintext Framing
//!
//! ## Creation Reason
//! Control payloads (SMP, disconnect, extra key requests) ride inside the
//! encrypted part of data messages as type-length-value records.
//!
//! ## Plaintext Layout
//! ```text
//! human-readable message || 0x00 || TLV || TLV || ...
//! TLV = SHORT type || SHORT length || length bytes
//! ```
//! The NUL and the TLV tail are omitted when there are no records.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Unknown TLV types are kept as `TlvType::Other` and ignored by callers
//! - A truncated record is an error for the whole message
//!
//! ## Last Modified
//! v0.1.0 - Initial TLV definitions

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CoreError, Result};

// ============================================
// TlvType
// ============================================

/// TLV record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlvType {
    /// 0: padding, ignored.
    Padding,
    /// 1: the sender has ended the private conversation.
    Disconnected,
    /// 2: SMP message 1.
    Smp1,
    /// 3: SMP message 2.
    Smp2,
    /// 4: SMP message 3.
    Smp3,
    /// 5: SMP message 4.
    Smp4,
    /// 6: SMP abort.
    SmpAbort,
    /// 7: SMP message 1 with a question.
    Smp1Question,
    /// 8: the sender derived the extra symmetric key.
    ExtraSymmetricKey,
    /// Any other value.
    Other(u16),
}

impl TlvType {
    /// Maps a wire value to a type.
    #[must_use]
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Padding,
            1 => Self::Disconnected,
            2 => Self::Smp1,
            3 => Self::Smp2,
            4 => Self::Smp3,
            5 => Self::Smp4,
            6 => Self::SmpAbort,
            7 => Self::Smp1Question,
            8 => Self::ExtraSymmetricKey,
            other => Self::Other(other),
        }
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            Self::Padding => 0,
            Self::Disconnected => 1,
            Self::Smp1 => 2,
            Self::Smp2 => 3,
            Self::Smp3 => 4,
            Self::Smp4 => 5,
            Self::SmpAbort => 6,
            Self::Smp1Question => 7,
            Self::ExtraSymmetricKey => 8,
            Self::Other(v) => *v,
        }
    }

    /// Returns `true` for the SMP record types, abort included.
    #[must_use]
    pub const fn is_smp(&self) -> bool {
        matches!(
            self,
            Self::Smp1
                | Self::Smp2
                | Self::Smp3
                | Self::Smp4
                | Self::SmpAbort
                | Self::Smp1Question
        )
    }
}

// ============================================
// Tlv
// ============================================

/// One TLV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// Record type.
    pub tlv_type: TlvType,
    /// Record value.
    pub value: Vec<u8>,
}

impl Tlv {
    /// Creates a record.
    #[must_use]
    pub fn new(tlv_type: TlvType, value: Vec<u8>) -> Self {
        Self { tlv_type, value }
    }

    /// A record with no value.
    #[must_use]
    pub fn empty(tlv_type: TlvType) -> Self {
        Self::new(tlv_type, Vec::new())
    }

    /// Appends the wire form to `buf`.
    ///
    /// # Errors
    /// Returns `MalformedTlv` if the value exceeds 65535 bytes.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let len = u16::try_from(self.value.len())
            .map_err(|_| CoreError::malformed_tlv("value longer than 65535 bytes"))?;
        buf.put_u16(self.tlv_type.as_u16());
        buf.put_u16(len);
        buf.put_slice(&self.value);
        Ok(())
    }

    /// Reads one record from the front of `buf`.
    ///
    /// # Errors
    /// Returns `MalformedTlv` if the record is truncated.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(CoreError::malformed_tlv("truncated TLV header"));
        }
        let tlv_type = TlvType::from_u16(buf.get_u16());
        let len = usize::from(buf.get_u16());
        if buf.remaining() < len {
            return Err(CoreError::malformed_tlv(format!(
                "TLV length {len} exceeds remaining {}",
                buf.remaining()
            )));
        }
        Ok(Self {
            tlv_type,
            value: buf.split_to(len).to_vec(),
        })
    }
}

// ============================================
// Plaintext
// ============================================

/// Decrypted contents of a data message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plaintext {
    /// Human-readable part, up to the first NUL.
    pub message: Vec<u8>,
    /// Control records after the NUL.
    pub tlvs: Vec<Tlv>,
}

impl Plaintext {
    /// A plaintext with only a message.
    #[must_use]
    pub fn message(message: impl Into<Vec<u8>>) -> Self {
        Self {
            message: message.into(),
            tlvs: Vec::new(),
        }
    }

    /// A plaintext with only records.
    #[must_use]
    pub fn tlvs(tlvs: Vec<Tlv>) -> Self {
        Self {
            message: Vec::new(),
            tlvs,
        }
    }

    /// Returns `true` when there is neither message nor records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message.is_empty() && self.tlvs.is_empty()
    }

    /// Serializes to the encrypted payload layout.
    ///
    /// # Errors
    /// - `MalformedMessage` if the message contains NUL, which would be
    ///   read back as the start of the records
    /// - `MalformedTlv` if a record value is too long
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.message.contains(&0) {
            return Err(CoreError::malformed("message text contains NUL"));
        }
        let mut buf = BytesMut::with_capacity(self.message.len() + 1);
        buf.put_slice(&self.message);
        if !self.tlvs.is_empty() {
            buf.put_u8(0x00);
            for tlv in &self.tlvs {
                tlv.encode(&mut buf)?;
            }
        }
        Ok(buf.to_vec())
    }

    /// Parses a decrypted payload.
    ///
    /// # Errors
    /// Returns `MalformedTlv` if the TLV tail is truncated.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some(nul) = data.iter().position(|b| *b == 0) else {
            return Ok(Self::message(data.to_vec()));
        };
        let mut tail = Bytes::copy_from_slice(&data[nul + 1..]);
        let mut tlvs = Vec::new();
        while tail.has_remaining() {
            tlvs.push(Tlv::decode(&mut tail)?);
        }
        Ok(Self {
            message: data[..nul].to_vec(),
            tlvs,
        })
    }

    /// Returns the first record of the given type.
    #[must_use]
    pub fn find(&self, tlv_type: TlvType) -> Option<&Tlv> {
        self.tlvs.iter().find(|t| t.tlv_type == tlv_type)
    }
}

// ============================================
// Tests
// ============================================
