// ============================================
// File: crates/otr-core/src/crypto/group.rs
// ============================================
//! # Group Arithmetic
//!
//! ## Creation Reason
//! Both the AKE and SMP work in the 1536-bit MODP group of RFC 3526 with
//! generator 2. This module owns the group constants, the modular helpers
//! and the range checks applied to every value received from the peer.
//!
//! ## Main Functionality
//! - `modulus()`, `order()`, `generator()`: `p`, `q = (p-1)/2`, `g = 2`
//! - `mod_exp`, `mul_mod`, `sub_mod`, `div_mod`: arithmetic helpers
//! - `check_group_element`: `2 <= x <= p-2` (AKE public values)
//! - `check_subgroup_element`: range plus `x^q == 1` (SMP elements)
//! - `check_exponent`: `1 <= x < q` (SMP proof responses)
//! - `mpi_encode`: the OTR multi-precision integer wire form
//! - `ct_eq_fixed`: constant-time equality over fixed-width encodings
//!
//! ## ⚠️ Important Note for Next Developer
//! - `num-bigint` is not constant-time. Secret exponents are converted to
//!   `BigUint` only for the duration of one exponentiation
//! - Validate before computing: nothing received from the peer should reach
//!   `mod_exp` unchecked
//!
//! ## Last Modified
//! v0.1.0 - Initial group implementation

use std::sync::OnceLock;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use subtle::ConstantTimeEq;

use crate::error::{CoreError, Result};

// ============================================
// Group Constants
// ============================================

/// The 1536-bit MODP prime of RFC 3526, big-endian.
const MODULUS_BYTES: [u8; 192] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2,
    0x21, 0x68, 0xc2, 0x34, 0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
    0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74, 0x02, 0x0b, 0xbe, 0xa6,
    0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d,
    0xf2, 0x5f, 0x14, 0x37, 0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
    0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6, 0xf4, 0x4c, 0x42, 0xe9,
    0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11,
    0x7c, 0x4b, 0x1f, 0xe6, 0x49, 0x28, 0x66, 0x51, 0xec, 0xe4, 0x5b, 0x3d,
    0xc2, 0x00, 0x7c, 0xb8, 0xa1, 0x63, 0xbf, 0x05, 0x98, 0xda, 0x48, 0x36,
    0x1c, 0x55, 0xd3, 0x9a, 0x69, 0x16, 0x3f, 0xa8, 0xfd, 0x24, 0xcf, 0x5f,
    0x83, 0x65, 0x5d, 0x23, 0xdc, 0xa3, 0xad, 0x96, 0x1c, 0x62, 0xf3, 0x56,
    0x20, 0x85, 0x52, 0xbb, 0x9e, 0xd5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6d,
    0x67, 0x0c, 0x35, 0x4e, 0x4a, 0xbc, 0x98, 0x04, 0xf1, 0x74, 0x6c, 0x08,
    0xca, 0x23, 0x73, 0x27, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

struct GroupParams {
    p: BigUint,
    q: BigUint,
    g: BigUint,
    p_minus_two: BigUint,
}

fn params() -> &'static GroupParams {
    static PARAMS: OnceLock<GroupParams> = OnceLock::new();
    PARAMS.get_or_init(|| {
        let p = BigUint::from_bytes_be(&MODULUS_BYTES);
        let q = (&p - 1u32) >> 1;
        let p_minus_two = &p - 2u32;
        GroupParams {
            p,
            q,
            g: BigUint::from(2u32),
            p_minus_two,
        }
    })
}

/// The group modulus `p`.
#[must_use]
pub fn modulus() -> &'static BigUint {
    &params().p
}

/// The subgroup order `q = (p-1)/2`.
#[must_use]
pub fn order() -> &'static BigUint {
    &params().q
}

/// The generator `g = 2`.
#[must_use]
pub fn generator() -> &'static BigUint {
    &params().g
}

/// `p - 2`, the largest acceptable group element.
#[must_use]
pub fn modulus_minus_two() -> &'static BigUint {
    &params().p_minus_two
}

// ============================================
// Arithmetic
// ============================================

/// Computes `base^exp mod p`.
#[must_use]
pub fn mod_exp(base: &BigUint, exp: &BigUint) -> BigUint {
    base.modpow(exp, modulus())
}

/// Computes `g^exp mod p`.
#[must_use]
pub fn generator_exp(exp: &BigUint) -> BigUint {
    mod_exp(generator(), exp)
}

/// Computes `a * b mod m`.
#[must_use]
pub fn mul_mod(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a * b) % m
}

/// Computes `a - b mod m` without leaving the unsigned domain.
#[must_use]
pub fn sub_mod(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    let a = a % m;
    let b = b % m;
    if a >= b {
        a - b
    } else {
        m - (b - a)
    }
}

/// Computes `a^-1 mod p` by Fermat's little theorem.
#[must_use]
pub fn inverse_mod_p(a: &BigUint) -> BigUint {
    a.modpow(modulus_minus_two(), modulus())
}

/// Computes `a / b mod p`.
#[must_use]
pub fn div_mod(a: &BigUint, b: &BigUint) -> BigUint {
    mul_mod(a, &inverse_mod_p(b), modulus())
}

// ============================================
// Validation
// ============================================

/// Returns `true` if `2 <= x <= p-2`.
#[must_use]
pub fn is_group_element(x: &BigUint) -> bool {
    *x >= *generator() && x <= modulus_minus_two()
}

/// Rejects values outside `[2, p-2]`.
///
/// # Errors
/// Returns `InvalidGroupElement` naming `context`.
pub fn check_group_element(x: &BigUint, context: &str) -> Result<()> {
    if is_group_element(x) {
        Ok(())
    } else {
        Err(CoreError::invalid_group_element(context))
    }
}

/// Rejects values outside `[2, p-2]` or outside the order-`q` subgroup.
///
/// # Errors
/// Returns `InvalidGroupElement` naming `context`.
pub fn check_subgroup_element(x: &BigUint, context: &str) -> Result<()> {
    check_group_element(x, context)?;
    if mod_exp(x, order()).is_one() {
        Ok(())
    } else {
        Err(CoreError::invalid_group_element(context))
    }
}

/// Rejects exponents outside `[1, q)`.
///
/// # Errors
/// Returns `InvalidExponent` naming `context`.
pub fn check_exponent(x: &BigUint, context: &str) -> Result<()> {
    if x.is_zero() || x >= order() {
        Err(CoreError::invalid_exponent(context))
    } else {
        Ok(())
    }
}

// ============================================
// Comparison
// ============================================

/// Compares `a` and `b` as `width`-byte big-endian strings in constant time.
///
/// Values that do not fit in `width` bytes never compare equal.
#[must_use]
pub fn ct_eq_fixed(a: &BigUint, b: &BigUint, width: usize) -> bool {
    match (fixed_width(a, width), fixed_width(b, width)) {
        (Some(a), Some(b)) => a.as_slice().ct_eq(b.as_slice()).into(),
        _ => false,
    }
}

fn fixed_width(value: &BigUint, width: usize) -> Option<Vec<u8>> {
    let bytes = value.to_bytes_be();
    let pad = width.checked_sub(bytes.len())?;
    let mut out = vec![0u8; width];
    out[pad..].copy_from_slice(&bytes);
    Some(out)
}

// ============================================
// MPI Encoding
// ============================================

/// Minimal big-endian magnitude; zero encodes as no bytes.
#[must_use]
pub fn minimal_bytes(value: &BigUint) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_bytes_be()
    }
}

/// Encodes `value` as `u32 length || big-endian bytes`.
#[must_use]
pub fn mpi_encode(value: &BigUint) -> Vec<u8> {
    let body = minimal_bytes(value);
    let mut out = Vec::with_capacity(4 + body.len());
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_constants() {
        assert_eq!(modulus().bits(), 1536);
        assert_eq!(order() * 2u32 + 1u32, *modulus());
        // 2 generates the order-q subgroup.
        assert!(mod_exp(generator(), order()).is_one());
    }

    #[test]
    fn test_group_element_bounds() {
        assert!(!is_group_element(&BigUint::from(1u32)));
        assert!(is_group_element(&BigUint::from(2u32)));
        assert!(is_group_element(modulus_minus_two()));
        assert!(!is_group_element(&(modulus() - 1u32)));
        assert!(!is_group_element(modulus()));

        let err = check_group_element(&BigUint::zero(), "g^x").unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_subgroup_membership() {
        // p-2 is in range but is a quadratic non-residue, so outside the subgroup.
        assert!(check_group_element(modulus_minus_two(), "x").is_ok());
        let squared = generator_exp(&BigUint::from(12345u32));
        assert!(check_subgroup_element(&squared, "x").is_ok());
    }

    #[test]
    fn test_exponent_bounds() {
        assert!(check_exponent(&BigUint::zero(), "d").is_err());
        assert!(check_exponent(&BigUint::one(), "d").is_ok());
        assert!(check_exponent(order(), "d").is_err());
        assert!(check_exponent(&(order() - 1u32), "d").is_ok());
    }

    #[test]
    fn test_sub_mod_wraps() {
        let q = order();
        let r = sub_mod(&BigUint::from(3u32), &BigUint::from(5u32), q);
        assert_eq!(r, q - 2u32);
        assert_eq!(
            sub_mod(&BigUint::from(9u32), &BigUint::from(4u32), q),
            BigUint::from(5u32)
        );
    }

    #[test]
    fn test_div_mod_inverts_mul() {
        let a = generator_exp(&BigUint::from(77u32));
        let b = generator_exp(&BigUint::from(1234u32));
        let product = mul_mod(&a, &b, modulus());
        assert_eq!(div_mod(&product, &b), a);
    }

    #[test]
    fn test_mpi_encode() {
        assert_eq!(mpi_encode(&BigUint::zero()), vec![0, 0, 0, 0]);
        assert_eq!(mpi_encode(&BigUint::from(0x0102u32)), vec![0, 0, 0, 2, 1, 2]);
        assert_eq!(mpi_encode(modulus()).len(), 4 + 192);
    }

    #[test]
    fn test_ct_eq_fixed() {
        let a = BigUint::from(0x1234u32);
        assert!(ct_eq_fixed(&a, &BigUint::from(0x1234u32), 32));
        assert!(!ct_eq_fixed(&a, &BigUint::from(0x1235u32), 32));
        assert!(ct_eq_fixed(&BigUint::zero(), &BigUint::zero(), 32));
        assert!(ct_eq_fixed(modulus(), modulus(), 192));
        assert!(!ct_eq_fixed(modulus(), modulus(), 32));
    }
}
