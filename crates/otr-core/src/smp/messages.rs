// ============================================
// File: crates/otr-core/src/smp/messages.rs
// ============================================
//! # SMP Messages
//!
//! ## Creation Reason
//! The four SMP messages travel as TLV records inside data messages. This
//! module defines them, converts them to and from TLVs and range-checks
//! every value before the state machine touches it.
//!
//! ## TLV Value Layout
//! ```text
//! SMP1..SMP4:  u32 count || MPI * count
//! SMP1Q:       question bytes || 0x00 || u32 count || MPI * count
//! ```
//!
//! | Message | Count | Values |
//! |---------|-------|--------|
//! | SMP1 | 6 | g2a, c2, D2, g3a, c3, D3 |
//! | SMP2 | 11 | g2b, c2, D2, g3b, c3, D3, Pb, Qb, cP, D5, D6 |
//! | SMP3 | 8 | Pa, Qa, cP, D5, D6, Ra, cR, D7 |
//! | SMP4 | 3 | Rb, cR, D7 |
//!
//! ## Last Modified
//! v0.1.0 - Initial SMP message definitions

use bytes::{BufMut, Bytes, BytesMut};
use num_bigint::BigUint;

use crate::crypto::group::{check_exponent, check_subgroup_element};
use crate::error::{CoreError, Result};
use crate::protocol::codec::{get_mpi, get_u32, put_mpi};
use crate::protocol::{Tlv, TlvType};

// ============================================
// MPI Lists
// ============================================

fn encode_mpis(values: &[&BigUint]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32(u32::try_from(values.len()).unwrap_or(u32::MAX));
    for v in values {
        put_mpi(&mut buf, v);
    }
    buf.to_vec()
}

fn decode_mpis<const N: usize>(value: &[u8]) -> Result<[BigUint; N]> {
    let mut buf = Bytes::copy_from_slice(value);
    let count = get_u32(&mut buf).map_err(|_| CoreError::malformed_tlv("missing MPI count"))?;
    if usize::try_from(count).ok() != Some(N) {
        return Err(CoreError::malformed_tlv(format!(
            "expected {N} MPIs, got {count}"
        )));
    }
    let mut out: [BigUint; N] = std::array::from_fn(|_| BigUint::default());
    for slot in &mut out {
        *slot = get_mpi(&mut buf)?;
    }
    if !buf.is_empty() {
        return Err(CoreError::malformed_tlv("trailing bytes after MPIs"));
    }
    Ok(out)
}

fn expect_type(tlv: &Tlv, allowed: &[TlvType]) -> Result<()> {
    if allowed.contains(&tlv.tlv_type) {
        Ok(())
    } else {
        Err(CoreError::malformed_tlv(format!(
            "unexpected TLV type {}",
            tlv.tlv_type.as_u16()
        )))
    }
}

// ============================================
// Smp1
// ============================================

/// First message: the initiator's `g2a`, `g3a` and proofs of their logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smp1 {
    /// Optional question for the responder
    pub question: Option<String>,
    /// `g^a2`
    pub g2a: BigUint,
    /// Challenge for `a2`
    pub c2: BigUint,
    /// Response for `a2`
    pub d2: BigUint,
    /// `g^a3`
    pub g3a: BigUint,
    /// Challenge for `a3`
    pub c3: BigUint,
    /// Response for `a3`
    pub d3: BigUint,
}

impl Smp1 {
    /// Encodes as TLV 2, or TLV 7 when a question is set.
    #[must_use]
    pub fn to_tlv(&self) -> Tlv {
        let mpis = encode_mpis(&[&self.g2a, &self.c2, &self.d2, &self.g3a, &self.c3, &self.d3]);
        match &self.question {
            Some(q) => {
                let mut value = Vec::with_capacity(q.len() + 1 + mpis.len());
                value.extend_from_slice(q.as_bytes());
                value.push(0x00);
                value.extend_from_slice(&mpis);
                Tlv::new(TlvType::Smp1Question, value)
            }
            None => Tlv::new(TlvType::Smp1, mpis),
        }
    }

    /// Decodes TLV 2 or TLV 7.
    ///
    /// # Errors
    /// Returns `MalformedTlv` or `MalformedMpi` for a corrupt value.
    pub fn from_tlv(tlv: &Tlv) -> Result<Self> {
        expect_type(tlv, &[TlvType::Smp1, TlvType::Smp1Question])?;
        let (question, rest) = if tlv.tlv_type == TlvType::Smp1Question {
            let nul = tlv
                .value
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| CoreError::malformed_tlv("unterminated SMP question"))?;
            let question = String::from_utf8_lossy(&tlv.value[..nul]).into_owned();
            (Some(question), &tlv.value[nul + 1..])
        } else {
            (None, tlv.value.as_slice())
        };
        let [g2a, c2, d2, g3a, c3, d3] = decode_mpis::<6>(rest)?;
        Ok(Self {
            question,
            g2a,
            c2,
            d2,
            g3a,
            c3,
            d3,
        })
    }

    /// Range-checks group elements and exponents.
    ///
    /// # Errors
    /// `InvalidGroupElement` or `InvalidExponent`.
    pub fn validate(&self) -> Result<()> {
        check_subgroup_element(&self.g2a, "SMP1 g2a")?;
        check_subgroup_element(&self.g3a, "SMP1 g3a")?;
        check_exponent(&self.d2, "SMP1 D2")?;
        check_exponent(&self.d3, "SMP1 D3")
    }
}

// ============================================
// Smp2
// ============================================

/// Second message: the responder's `g2b`, `g3b`, `Pb`, `Qb` and proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smp2 {
    /// `g^b2`
    pub g2b: BigUint,
    /// Challenge for `b2`
    pub c2: BigUint,
    /// Response for `b2`
    pub d2: BigUint,
    /// `g^b3`
    pub g3b: BigUint,
    /// Challenge for `b3`
    pub c3: BigUint,
    /// Response for `b3`
    pub d3: BigUint,
    /// `g3^r4`
    pub pb: BigUint,
    /// `g^r4 * g2^y`
    pub qb: BigUint,
    /// Joint challenge for `Pb`, `Qb`
    pub cp: BigUint,
    /// Response for `r4`
    pub d5: BigUint,
    /// Response for `y`
    pub d6: BigUint,
}

impl Smp2 {
    /// Encodes as TLV 3.
    #[must_use]
    pub fn to_tlv(&self) -> Tlv {
        Tlv::new(
            TlvType::Smp2,
            encode_mpis(&[
                &self.g2b, &self.c2, &self.d2, &self.g3b, &self.c3, &self.d3, &self.pb, &self.qb,
                &self.cp, &self.d5, &self.d6,
            ]),
        )
    }

    /// Decodes TLV 3.
    ///
    /// # Errors
    /// Returns `MalformedTlv` or `MalformedMpi` for a corrupt value.
    pub fn from_tlv(tlv: &Tlv) -> Result<Self> {
        expect_type(tlv, &[TlvType::Smp2])?;
        let [g2b, c2, d2, g3b, c3, d3, pb, qb, cp, d5, d6] = decode_mpis::<11>(&tlv.value)?;
        Ok(Self {
            g2b,
            c2,
            d2,
            g3b,
            c3,
            d3,
            pb,
            qb,
            cp,
            d5,
            d6,
        })
    }

    /// Range-checks group elements and exponents.
    ///
    /// # Errors
    /// `InvalidGroupElement` or `InvalidExponent`.
    pub fn validate(&self) -> Result<()> {
        check_subgroup_element(&self.g2b, "SMP2 g2b")?;
        check_subgroup_element(&self.g3b, "SMP2 g3b")?;
        check_subgroup_element(&self.pb, "SMP2 Pb")?;
        check_subgroup_element(&self.qb, "SMP2 Qb")?;
        check_exponent(&self.d2, "SMP2 D2")?;
        check_exponent(&self.d3, "SMP2 D3")?;
        check_exponent(&self.d5, "SMP2 D5")?;
        check_exponent(&self.d6, "SMP2 D6")
    }
}

// ============================================
// Smp3
// ============================================

/// Third message: the initiator's `Pa`, `Qa`, `Ra` and proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smp3 {
    /// `g3^r4`
    pub pa: BigUint,
    /// `g^r4 * g2^x`
    pub qa: BigUint,
    /// Joint challenge for `Pa`, `Qa`
    pub cp: BigUint,
    /// Response for `r4`
    pub d5: BigUint,
    /// Response for `x`
    pub d6: BigUint,
    /// `(Qa/Qb)^a3`
    pub ra: BigUint,
    /// Challenge for `Ra`
    pub cr: BigUint,
    /// Response for `a3`
    pub d7: BigUint,
}

impl Smp3 {
    /// Encodes as TLV 4.
    #[must_use]
    pub fn to_tlv(&self) -> Tlv {
        Tlv::new(
            TlvType::Smp3,
            encode_mpis(&[
                &self.pa, &self.qa, &self.cp, &self.d5, &self.d6, &self.ra, &self.cr, &self.d7,
            ]),
        )
    }

    /// Decodes TLV 4.
    ///
    /// # Errors
    /// Returns `MalformedTlv` or `MalformedMpi` for a corrupt value.
    pub fn from_tlv(tlv: &Tlv) -> Result<Self> {
        expect_type(tlv, &[TlvType::Smp3])?;
        let [pa, qa, cp, d5, d6, ra, cr, d7] = decode_mpis::<8>(&tlv.value)?;
        Ok(Self {
            pa,
            qa,
            cp,
            d5,
            d6,
            ra,
            cr,
            d7,
        })
    }

    /// Range-checks group elements and exponents.
    ///
    /// # Errors
    /// `InvalidGroupElement` or `InvalidExponent`.
    pub fn validate(&self) -> Result<()> {
        check_subgroup_element(&self.pa, "SMP3 Pa")?;
        check_subgroup_element(&self.qa, "SMP3 Qa")?;
        check_subgroup_element(&self.ra, "SMP3 Ra")?;
        check_exponent(&self.d5, "SMP3 D5")?;
        check_exponent(&self.d6, "SMP3 D6")?;
        check_exponent(&self.d7, "SMP3 D7")
    }
}

// ============================================
// Smp4
// ============================================

/// Fourth message: the responder's `Rb` and its proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smp4 {
    /// `(Qa/Qb)^b3`
    pub rb: BigUint,
    /// Challenge for `Rb`
    pub cr: BigUint,
    /// Response for `b3`
    pub d7: BigUint,
}

impl Smp4 {
    /// Encodes as TLV 5.
    #[must_use]
    pub fn to_tlv(&self) -> Tlv {
        Tlv::new(TlvType::Smp4, encode_mpis(&[&self.rb, &self.cr, &self.d7]))
    }

    /// Decodes TLV 5.
    ///
    /// # Errors
    /// Returns `MalformedTlv` or `MalformedMpi` for a corrupt value.
    pub fn from_tlv(tlv: &Tlv) -> Result<Self> {
        expect_type(tlv, &[TlvType::Smp4])?;
        let [rb, cr, d7] = decode_mpis::<3>(&tlv.value)?;
        Ok(Self { rb, cr, d7 })
    }

    /// Range-checks group elements and exponents.
    ///
    /// # Errors
    /// `InvalidGroupElement` or `InvalidExponent`.
    pub fn validate(&self) -> Result<()> {
        check_subgroup_element(&self.rb, "SMP4 Rb")?;
        check_exponent(&self.d7, "SMP4 D7")
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::group;

    fn n(v: u32) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn test_smp1_question_layout() {
        let msg = Smp1 {
            question: Some("pet?".to_string()),
            g2a: n(4),
            c2: n(5),
            d2: n(6),
            g3a: n(7),
            c3: n(8),
            d3: n(9),
        };
        let tlv = msg.to_tlv();
        assert_eq!(tlv.tlv_type, TlvType::Smp1Question);
        assert_eq!(&tlv.value[..9], b"pet?\0\0\0\0\x06");
        assert_eq!(Smp1::from_tlv(&tlv).unwrap(), msg);

        let plain = Smp1 {
            question: None,
            ..msg
        };
        let tlv = plain.to_tlv();
        assert_eq!(tlv.tlv_type, TlvType::Smp1);
        assert_eq!(Smp1::from_tlv(&tlv).unwrap(), plain);
    }

    #[test]
    fn test_wrong_count_is_malformed() {
        let tlv = Tlv::new(TlvType::Smp4, encode_mpis(&[&n(2), &n(3)]));
        assert!(matches!(
            Smp4::from_tlv(&tlv).unwrap_err(),
            CoreError::MalformedTlv { .. }
        ));
    }

    #[test]
    fn test_wrong_type_is_malformed() {
        let tlv = Tlv::new(TlvType::Smp3, encode_mpis(&[&n(2), &n(3), &n(4)]));
        assert!(Smp4::from_tlv(&tlv).is_err());
    }

    #[test]
    fn test_truncated_mpi() {
        let mut value = encode_mpis(&[&n(2), &n(3), &n(0x1234)]);
        value.pop();
        let tlv = Tlv::new(TlvType::Smp4, value);
        assert!(Smp4::from_tlv(&tlv).unwrap_err().is_malformed());
    }

    #[test]
    fn test_unterminated_question() {
        let tlv = Tlv::new(TlvType::Smp1Question, b"no terminator".to_vec());
        assert!(Smp1::from_tlv(&tlv).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let good = group::generator_exp(&n(12345));
        let msg = Smp4 {
            rb: n(1),
            cr: n(1),
            d7: n(1),
        };
        assert!(matches!(
            msg.validate().unwrap_err(),
            CoreError::InvalidGroupElement { .. }
        ));

        let msg = Smp4 {
            rb: good.clone(),
            cr: n(1),
            d7: group::order().clone(),
        };
        assert!(matches!(
            msg.validate().unwrap_err(),
            CoreError::InvalidExponent { .. }
        ));

        // p-2 is in range but not in the order-q subgroup
        let msg = Smp4 {
            rb: group::modulus_minus_two().clone(),
            cr: n(1),
            d7: n(1),
        };
        assert!(msg.validate().is_err());

        let msg = Smp4 {
            rb: good,
            cr: n(1),
            d7: n(1),
        };
        assert!(msg.validate().is_ok());
    }
}
