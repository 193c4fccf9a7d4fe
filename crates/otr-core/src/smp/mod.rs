// ============================================
// File: crates/otr-core/src/smp/mod.rs
// ============================================
//! # Socialist Millionaire Protocol
//!
//! ## Creation Reason
//! Lets two parties in an encrypted session check that they hold the same
//! secret without revealing it, which authenticates the long-term keys
//! out of band.
//!
//! ## Main Functionality
//! - `SmpContext`: the state machine, driven by received TLVs
//! - `SmpState`: `Expect1 | WaitingForSecret | Expect2 | Expect3 | Expect4`
//! - `SmpStep`: reply, event and failure produced by one received TLV
//!
//! ## Message Flow
//! ```text
//! Alice (secret x)                                    Bob (secret y)
//!   │  SMP1: g2a, g3a + proofs (1, 2)                   │
//!   │ ────────────────────────────────────────────────► │ WaitingForSecret
//!   │                                                    │ ◄── provide_secret(y)
//!   │         SMP2: g2b, g3b, Pb, Qb + proofs (3, 4, 5)  │
//!   │ ◄──────────────────────────────────────────────── │ Expect3
//!   │  SMP3: Pa, Qa, Ra + proofs (6, 7)                  │
//!   │ ────────────────────────────────────────────────► │ Rab == Pa/Pb ?
//!   │                          SMP4: Rb + proof (8)      │
//!   │ ◄──────────────────────────────────────────────── │ Expect1
//!   │  Rab == Pa/Pb ?                                    │
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every value is range-checked and every proof verified BEFORE the
//!   state changes
//! - Any failure or out-of-order message resets to `Expect1` and queues an
//!   abort TLV for the peer
//! - Unequal secrets are a `Failure` event, not an error
//!
//! ## Last Modified
//! v0.1.0 - Initial SMP state machine

pub mod messages;

use std::fmt;

use num_bigint::BigUint;
use rand::RngCore;
use tracing::{debug, info, warn};

use otr_common::types::SecretBytes;

use crate::crypto::group::{self, div_mod, generator_exp, mod_exp, mul_mod, order, sub_mod};
use crate::crypto::kdf::smp_hash;
use crate::crypto::{DH_MODULUS_SIZE, SHA256_SIZE, SMP_EXPONENT_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::{Tlv, TlvType};

pub use messages::{Smp1, Smp2, Smp3, Smp4};

// ============================================
// Exponent
// ============================================

/// A secret SMP exponent, zeroed on drop.
pub struct Exponent(SecretBytes);

impl Exponent {
    fn random(rng: &mut dyn RngCore) -> Result<Self> {
        Ok(Self(SecretBytes::random(rng, SMP_EXPONENT_SIZE)?))
    }

    fn from_secret(secret: &SecretBytes) -> Self {
        Self(secret.clone())
    }

    fn value(&self) -> BigUint {
        BigUint::from_bytes_be(self.0.expose())
    }
}

impl fmt::Debug for Exponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Exponent([REDACTED])")
    }
}

// ============================================
// Events
// ============================================

/// Progress notifications for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpEvent {
    /// The peer started SMP; the user must supply the secret.
    AskForSecret {
        /// Question the peer attached, if any
        question: Option<String>,
    },
    /// The exchange is progressing.
    InProgress {
        /// Rough completion percentage
        percent: u8,
    },
    /// Both secrets match.
    Success,
    /// The secrets differ.
    Failure,
    /// A proof or value from the peer failed verification.
    Cheated,
    /// The peer aborted.
    Aborted,
    /// A malformed or out-of-order message ended the exchange.
    Error,
}

impl SmpEvent {
    /// Completion percentage associated with the event.
    #[must_use]
    pub const fn progress(&self) -> u8 {
        match self {
            Self::AskForSecret { .. } => 25,
            Self::InProgress { percent } => *percent,
            Self::Success | Self::Failure => 100,
            Self::Cheated | Self::Aborted | Self::Error => 0,
        }
    }
}

/// Everything one received SMP TLV produced.
#[derive(Debug, Default)]
pub struct SmpStep {
    /// TLV to send back
    pub reply: Option<Tlv>,
    /// Event for the application
    pub event: Option<SmpEvent>,
    /// Why the exchange was aborted, if it was
    pub failure: Option<CoreError>,
}

// ============================================
// SmpState
// ============================================

/// SMP state, carrying only the values the next step needs.
#[derive(Debug, Default)]
pub enum SmpState {
    /// Idle.
    #[default]
    Expect1,
    /// Received a valid SMP1; waiting for the user's secret.
    WaitingForSecret {
        /// The validated message
        msg1: Smp1,
    },
    /// Sent SMP1.
    Expect2 {
        /// Our secret
        x: Exponent,
        /// Our `a2`
        a2: Exponent,
        /// Our `a3`
        a3: Exponent,
    },
    /// Sent SMP2.
    Expect3 {
        /// Peer's `g3a`
        g3a: BigUint,
        /// Shared `g2`
        g2: BigUint,
        /// Shared `g3`
        g3: BigUint,
        /// Our `b3`
        b3: Exponent,
        /// Our `Pb`
        pb: BigUint,
        /// Our `Qb`
        qb: BigUint,
    },
    /// Sent SMP3.
    Expect4 {
        /// Peer's `g3b`
        g3b: BigUint,
        /// `Pa / Pb`
        pa_pb: BigUint,
        /// `Qa / Qb`
        qa_qb: BigUint,
        /// Our `a3`
        a3: Exponent,
    },
}

/// Discriminant of [`SmpState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmpStateKind {
    /// See [`SmpState::Expect1`]
    Expect1,
    /// See [`SmpState::WaitingForSecret`]
    WaitingForSecret,
    /// See [`SmpState::Expect2`]
    Expect2,
    /// See [`SmpState::Expect3`]
    Expect3,
    /// See [`SmpState::Expect4`]
    Expect4,
}

impl SmpState {
    /// Returns the discriminant.
    #[must_use]
    pub const fn kind(&self) -> SmpStateKind {
        match self {
            Self::Expect1 => SmpStateKind::Expect1,
            Self::WaitingForSecret { .. } => SmpStateKind::WaitingForSecret,
            Self::Expect2 { .. } => SmpStateKind::Expect2,
            Self::Expect3 { .. } => SmpStateKind::Expect3,
            Self::Expect4 { .. } => SmpStateKind::Expect4,
        }
    }
}

impl fmt::Display for SmpStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Expect1 => "SMPSTATE_EXPECT1",
            Self::WaitingForSecret => "SMPSTATE_WAIT_FOR_SECRET",
            Self::Expect2 => "SMPSTATE_EXPECT2",
            Self::Expect3 => "SMPSTATE_EXPECT3",
            Self::Expect4 => "SMPSTATE_EXPECT4",
        };
        f.write_str(name)
    }
}

// ============================================
// Proof Helpers
// ============================================

/// `D = r - a*c mod q`
fn response(r: &Exponent, a: &BigUint, c: &BigUint) -> BigUint {
    sub_mod(&r.value(), &mul_mod(a, c, order()), order())
}

/// Checks `c == h(index, g^d * ga^c)`.
fn verify_log_proof(index: u8, ga: &BigUint, c: &BigUint, d: &BigUint, proof: &'static str) -> Result<()> {
    let commitment = mul_mod(&generator_exp(d), &mod_exp(ga, c), group::modulus());
    check_challenge(c, &smp_hash(index, &commitment, None), proof)
}

fn check_challenge(received: &BigUint, computed: &BigUint, proof: &'static str) -> Result<()> {
    if group::ct_eq_fixed(received, computed, SHA256_SIZE) {
        Ok(())
    } else {
        Err(CoreError::ZkpVerificationFailed { proof })
    }
}

/// Proves knowledge of `a` with `ga = g^a` under `index`.
fn prove_log(index: u8, a: &Exponent, rng: &mut dyn RngCore) -> Result<(BigUint, BigUint)> {
    let r = Exponent::random(rng)?;
    let c = smp_hash(index, &generator_exp(&r.value()), None);
    let d = response(&r, &a.value(), &c);
    Ok((c, d))
}

/// Builds `P = g3^r4`, `Q = g^r4 * g2^secret` and their joint proof.
fn prove_pq(
    index: u8,
    g2: &BigUint,
    g3: &BigUint,
    secret: &Exponent,
    rng: &mut dyn RngCore,
) -> Result<(BigUint, BigUint, BigUint, BigUint, BigUint)> {
    let p = group::modulus();
    let r4 = Exponent::random(rng)?;
    let r5 = Exponent::random(rng)?;
    let r6 = Exponent::random(rng)?;

    let pv = mod_exp(g3, &r4.value());
    let qv = mul_mod(&generator_exp(&r4.value()), &mod_exp(g2, &secret.value()), p);

    let t1 = mod_exp(g3, &r5.value());
    let t2 = mul_mod(&generator_exp(&r5.value()), &mod_exp(g2, &r6.value()), p);
    let cp = smp_hash(index, &t1, Some(&t2));
    let d5 = response(&r5, &r4.value(), &cp);
    let d6 = response(&r6, &secret.value(), &cp);
    Ok((pv, qv, cp, d5, d6))
}

/// Checks the joint proof on `(P, Q)`.
#[allow(clippy::too_many_arguments)]
fn verify_pq(
    index: u8,
    g2: &BigUint,
    g3: &BigUint,
    pv: &BigUint,
    qv: &BigUint,
    cp: &BigUint,
    d5: &BigUint,
    d6: &BigUint,
) -> Result<()> {
    let p = group::modulus();
    let t1 = mul_mod(&mod_exp(g3, d5), &mod_exp(pv, cp), p);
    let t2 = mul_mod(
        &mul_mod(&generator_exp(d5), &mod_exp(g2, d6), p),
        &mod_exp(qv, cp),
        p,
    );
    check_challenge(cp, &smp_hash(index, &t1, Some(&t2)), "P/Q")
}

/// Proves `R = base^a` where `ga = g^a`.
fn prove_r(
    index: u8,
    base: &BigUint,
    a: &Exponent,
    rng: &mut dyn RngCore,
) -> Result<(BigUint, BigUint, BigUint)> {
    let r7 = Exponent::random(rng)?;
    let rv = mod_exp(base, &a.value());
    let cr = smp_hash(
        index,
        &generator_exp(&r7.value()),
        Some(&mod_exp(base, &r7.value())),
    );
    let d7 = response(&r7, &a.value(), &cr);
    Ok((rv, cr, d7))
}

/// Checks the proof that `R` and `ga` share an exponent over `base`.
fn verify_r(
    index: u8,
    base: &BigUint,
    ga: &BigUint,
    rv: &BigUint,
    cr: &BigUint,
    d7: &BigUint,
) -> Result<()> {
    let p = group::modulus();
    let t1 = mul_mod(&generator_exp(d7), &mod_exp(ga, cr), p);
    let t2 = mul_mod(&mod_exp(base, d7), &mod_exp(rv, cr), p);
    check_challenge(cr, &smp_hash(index, &t1, Some(&t2)), "R")
}

// ============================================
// SmpContext
// ============================================

/// One side of an SMP exchange.
#[derive(Debug, Default)]
pub struct SmpContext {
    state: SmpState,
    pending_abort: bool,
}

impl SmpContext {
    /// Creates an idle context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> &SmpState {
        &self.state
    }

    /// Returns the current state's discriminant.
    #[must_use]
    pub const fn state_kind(&self) -> SmpStateKind {
        self.state.kind()
    }

    /// Returns `true` if an exchange is under way.
    #[must_use]
    pub const fn in_progress(&self) -> bool {
        !matches!(self.state, SmpState::Expect1)
    }

    /// The peer's question while we are asked for the secret.
    #[must_use]
    pub fn question(&self) -> Option<&str> {
        match &self.state {
            SmpState::WaitingForSecret { msg1 } => msg1.question.as_deref(),
            _ => None,
        }
    }

    /// Drops any exchange in progress and returns the abort TLV to send.
    pub fn abort(&mut self) -> Tlv {
        if self.in_progress() {
            debug!(from = %self.state.kind(), "SMP aborted locally");
        }
        self.state = SmpState::Expect1;
        self.pending_abort = false;
        Tlv::empty(TlvType::SmpAbort)
    }

    /// Returns the abort owed to the peer after a local failure, once.
    ///
    /// Set when [`start`](Self::start) or [`provide_secret`](Self::provide_secret)
    /// fails while the peer is mid-exchange.
    pub fn take_pending_abort(&mut self) -> Option<Tlv> {
        std::mem::take(&mut self.pending_abort).then(|| Tlv::empty(TlvType::SmpAbort))
    }

    /// Starts an exchange with `secret` as ours.
    ///
    /// `secret` is the derived SMP secret with us as initiator. Returns the
    /// TLVs to send: a leading abort if an exchange was under way, then SMP1.
    ///
    /// # Errors
    /// Returns `ShortRandomRead` if `rng` fails; the state is then `Expect1`
    /// and, if an exchange was under way, an abort is left pending.
    pub fn start(
        &mut self,
        secret: &SecretBytes,
        question: Option<String>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Tlv>> {
        let interrupted = self.in_progress() || self.pending_abort;
        if self.in_progress() {
            debug!(from = %self.state.kind(), "SMP restarted");
        }
        self.state = SmpState::Expect1;
        self.pending_abort = false;

        match Self::first_message(secret, question, rng) {
            Ok((msg1, next)) => {
                let mut out = Vec::with_capacity(2);
                if interrupted {
                    out.push(Tlv::empty(TlvType::SmpAbort));
                }
                out.push(msg1.to_tlv());
                info!("SMP started");
                self.state = next;
                Ok(out)
            }
            Err(err) => {
                warn!(error = %err, "SMP start failed");
                self.pending_abort = interrupted;
                Err(err)
            }
        }
    }

    fn first_message(
        secret: &SecretBytes,
        question: Option<String>,
        rng: &mut dyn RngCore,
    ) -> Result<(Smp1, SmpState)> {
        let a2 = Exponent::random(rng)?;
        let a3 = Exponent::random(rng)?;
        let (c2, d2) = prove_log(1, &a2, rng)?;
        let (c3, d3) = prove_log(2, &a3, rng)?;
        let msg1 = Smp1 {
            question,
            g2a: generator_exp(&a2.value()),
            c2,
            d2,
            g3a: generator_exp(&a3.value()),
            c3,
            d3,
        };
        let next = SmpState::Expect2 {
            x: Exponent::from_secret(secret),
            a2,
            a3,
        };
        Ok((msg1, next))
    }

    /// Answers a received SMP1 with our secret.
    ///
    /// `secret` is the derived SMP secret with the peer as initiator.
    ///
    /// # Errors
    /// - `InvalidState` unless waiting for the secret
    /// - `ShortRandomRead` if `rng` fails; the exchange is then dropped and
    ///   an abort is left pending for the peer
    pub fn provide_secret(&mut self, secret: &SecretBytes, rng: &mut dyn RngCore) -> Result<Tlv> {
        let SmpState::WaitingForSecret { msg1 } = std::mem::take(&mut self.state) else {
            return Err(CoreError::invalid_state(
                "provide SMP secret",
                SmpStateKind::WaitingForSecret.to_string(),
            ));
        };

        match Self::second_message(&msg1, secret, rng) {
            Ok((msg2, next)) => {
                debug!("SMP secret supplied, sending SMP2");
                self.state = next;
                Ok(msg2.to_tlv())
            }
            Err(err) => {
                warn!(error = %err, "SMP answer failed, abort pending");
                self.pending_abort = true;
                Err(err)
            }
        }
    }

    fn second_message(
        msg1: &Smp1,
        secret: &SecretBytes,
        rng: &mut dyn RngCore,
    ) -> Result<(Smp2, SmpState)> {
        let y = Exponent::from_secret(secret);

        let b2 = Exponent::random(rng)?;
        let b3 = Exponent::random(rng)?;
        let (c2, d2) = prove_log(3, &b2, rng)?;
        let (c3, d3) = prove_log(4, &b3, rng)?;

        let g2 = mod_exp(&msg1.g2a, &b2.value());
        let g3 = mod_exp(&msg1.g3a, &b3.value());
        let (pb, qb, cp, d5, d6) = prove_pq(5, &g2, &g3, &y, rng)?;

        let msg2 = Smp2 {
            g2b: generator_exp(&b2.value()),
            c2,
            d2,
            g3b: generator_exp(&b3.value()),
            c3,
            d3,
            pb: pb.clone(),
            qb: qb.clone(),
            cp,
            d5,
            d6,
        };
        let next = SmpState::Expect3 {
            g3a: msg1.g3a.clone(),
            g2,
            g3,
            b3,
            pb,
            qb,
        };
        Ok((msg2, next))
    }

    /// Processes a received SMP TLV.
    ///
    /// Never fails as a whole: failures are reported in
    /// [`SmpStep::failure`] together with an abort reply and the state is
    /// back at `Expect1`.
    pub fn receive(&mut self, tlv: &Tlv, rng: &mut dyn RngCore) -> SmpStep {
        // Whatever the peer sends next supersedes an owed abort.
        self.pending_abort = false;
        if tlv.tlv_type == TlvType::SmpAbort {
            debug!(from = %self.state.kind(), "SMP aborted by peer");
            self.state = SmpState::Expect1;
            return SmpStep {
                event: Some(SmpEvent::Aborted),
                ..SmpStep::default()
            };
        }

        let from = self.state.kind();
        match self.dispatch(tlv, rng) {
            Ok(step) => step,
            Err(err) => {
                warn!(state = %from, error = %err, "SMP exchange aborted");
                self.state = SmpState::Expect1;
                let event = match err {
                    CoreError::ZkpVerificationFailed { .. }
                    | CoreError::InvalidGroupElement { .. }
                    | CoreError::InvalidExponent { .. } => SmpEvent::Cheated,
                    _ => SmpEvent::Error,
                };
                SmpStep {
                    reply: Some(Tlv::empty(TlvType::SmpAbort)),
                    event: Some(event),
                    failure: Some(err),
                }
            }
        }
    }

    fn dispatch(&mut self, tlv: &Tlv, rng: &mut dyn RngCore) -> Result<SmpStep> {
        let state = std::mem::take(&mut self.state);
        match (tlv.tlv_type, state) {
            (TlvType::Smp1 | TlvType::Smp1Question, SmpState::Expect1) => self.receive_msg1(tlv),
            (TlvType::Smp2, SmpState::Expect2 { x, a2, a3 }) => {
                self.receive_msg2(tlv, &x, &a2, a3, rng)
            }
            (
                TlvType::Smp3,
                SmpState::Expect3 {
                    g3a,
                    g2,
                    g3,
                    b3,
                    pb,
                    qb,
                },
            ) => Self::receive_msg3(tlv, &g3a, &g2, &g3, &b3, &pb, &qb, rng),
            (
                TlvType::Smp4,
                SmpState::Expect4 {
                    g3b,
                    pa_pb,
                    qa_qb,
                    a3,
                },
            ) => Self::receive_msg4(tlv, &g3b, &pa_pb, &qa_qb, &a3),
            (tlv_type, state) => Err(CoreError::unexpected(
                format!("SMP TLV {}", tlv_type.as_u16()),
                state.kind().to_string(),
            )),
        }
    }

    fn receive_msg1(&mut self, tlv: &Tlv) -> Result<SmpStep> {
        let msg1 = Smp1::from_tlv(tlv)?;
        msg1.validate()?;
        verify_log_proof(1, &msg1.g2a, &msg1.c2, &msg1.d2, "g2a")?;
        verify_log_proof(2, &msg1.g3a, &msg1.c3, &msg1.d3, "g3a")?;

        let question = msg1.question.clone();
        debug!(has_question = question.is_some(), "SMP1 accepted, waiting for secret");
        self.state = SmpState::WaitingForSecret { msg1 };
        Ok(SmpStep {
            event: Some(SmpEvent::AskForSecret { question }),
            ..SmpStep::default()
        })
    }

    fn receive_msg2(
        &mut self,
        tlv: &Tlv,
        x: &Exponent,
        a2: &Exponent,
        a3: Exponent,
        rng: &mut dyn RngCore,
    ) -> Result<SmpStep> {
        let msg2 = Smp2::from_tlv(tlv)?;
        msg2.validate()?;
        verify_log_proof(3, &msg2.g2b, &msg2.c2, &msg2.d2, "g2b")?;
        verify_log_proof(4, &msg2.g3b, &msg2.c3, &msg2.d3, "g3b")?;

        let g2 = mod_exp(&msg2.g2b, &a2.value());
        let g3 = mod_exp(&msg2.g3b, &a3.value());
        verify_pq(5, &g2, &g3, &msg2.pb, &msg2.qb, &msg2.cp, &msg2.d5, &msg2.d6)?;

        let (pa, qa, cp, d5, d6) = prove_pq(6, &g2, &g3, x, rng)?;
        let qa_qb = div_mod(&qa, &msg2.qb);
        let pa_pb = div_mod(&pa, &msg2.pb);
        let (ra, cr, d7) = prove_r(7, &qa_qb, &a3, rng)?;

        let msg3 = Smp3 {
            pa,
            qa,
            cp,
            d5,
            d6,
            ra,
            cr,
            d7,
        };
        debug!("SMP2 accepted, sending SMP3");
        self.state = SmpState::Expect4 {
            g3b: msg2.g3b,
            pa_pb,
            qa_qb,
            a3,
        };
        Ok(SmpStep {
            reply: Some(msg3.to_tlv()),
            event: Some(SmpEvent::InProgress { percent: 60 }),
            failure: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn receive_msg3(
        tlv: &Tlv,
        g3a: &BigUint,
        g2: &BigUint,
        g3: &BigUint,
        b3: &Exponent,
        pb: &BigUint,
        qb: &BigUint,
        rng: &mut dyn RngCore,
    ) -> Result<SmpStep> {
        let msg3 = Smp3::from_tlv(tlv)?;
        msg3.validate()?;
        verify_pq(6, g2, g3, &msg3.pa, &msg3.qa, &msg3.cp, &msg3.d5, &msg3.d6)?;

        let qa_qb = div_mod(&msg3.qa, qb);
        verify_r(7, &qa_qb, g3a, &msg3.ra, &msg3.cr, &msg3.d7)?;

        let (rb, cr, d7) = prove_r(8, &qa_qb, b3, rng)?;
        let msg4 = Smp4 { rb, cr, d7 };

        let rab = mod_exp(&msg3.ra, &b3.value());
        let pa_pb = div_mod(&msg3.pa, pb);
        let event = outcome(&rab, &pa_pb);
        Ok(SmpStep {
            reply: Some(msg4.to_tlv()),
            event: Some(event),
            failure: None,
        })
    }

    fn receive_msg4(
        tlv: &Tlv,
        g3b: &BigUint,
        pa_pb: &BigUint,
        qa_qb: &BigUint,
        a3: &Exponent,
    ) -> Result<SmpStep> {
        let msg4 = Smp4::from_tlv(tlv)?;
        msg4.validate()?;
        verify_r(8, qa_qb, g3b, &msg4.rb, &msg4.cr, &msg4.d7)?;

        let rab = mod_exp(&msg4.rb, &a3.value());
        Ok(SmpStep {
            reply: None,
            event: Some(outcome(&rab, pa_pb)),
            failure: None,
        })
    }
}

fn outcome(rab: &BigUint, pa_pb: &BigUint) -> SmpEvent {
    if group::ct_eq_fixed(rab, pa_pb, DH_MODULUS_SIZE) {
        info!("SMP succeeded: secrets match");
        SmpEvent::Success
    } else {
        info!("SMP finished: secrets differ");
        SmpEvent::Failure
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_rng::FailingRng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn secret(s: &[u8]) -> SecretBytes {
        SecretBytes::from_slice(s)
    }

    /// Runs a full exchange and returns both sides' final events.
    fn run(alice_secret: &[u8], bob_secret: &[u8]) -> (SmpEvent, SmpEvent) {
        let mut rng = ChaCha20Rng::seed_from_u64(41);
        let mut alice = SmpContext::new();
        let mut bob = SmpContext::new();

        let tlvs = alice
            .start(&secret(alice_secret), Some("colour?".into()), &mut rng)
            .unwrap();
        assert_eq!(tlvs.len(), 1);

        let step = bob.receive(&tlvs[0], &mut rng);
        assert_eq!(
            step.event,
            Some(SmpEvent::AskForSecret {
                question: Some("colour?".into())
            })
        );
        assert_eq!(bob.question(), Some("colour?"));
        assert_eq!(bob.state_kind(), SmpStateKind::WaitingForSecret);

        let msg2 = bob.provide_secret(&secret(bob_secret), &mut rng).unwrap();
        assert_eq!(bob.state_kind(), SmpStateKind::Expect3);

        let step = alice.receive(&msg2, &mut rng);
        assert_eq!(step.event, Some(SmpEvent::InProgress { percent: 60 }));
        assert_eq!(alice.state_kind(), SmpStateKind::Expect4);

        let step = bob.receive(&step.reply.unwrap(), &mut rng);
        assert!(step.failure.is_none());
        assert_eq!(bob.state_kind(), SmpStateKind::Expect1);
        let bob_event = step.event.unwrap();

        let step = alice.receive(&step.reply.unwrap(), &mut rng);
        assert!(step.reply.is_none());
        assert_eq!(alice.state_kind(), SmpStateKind::Expect1);
        (step.event.unwrap(), bob_event)
    }

    #[test]
    fn test_equal_secrets_succeed() {
        assert_eq!(run(b"blue", b"blue"), (SmpEvent::Success, SmpEvent::Success));
    }

    #[test]
    fn test_unequal_secrets_fail() {
        assert_eq!(run(b"blue", b"green"), (SmpEvent::Failure, SmpEvent::Failure));
    }

    #[test]
    fn test_tampered_proof_is_cheating() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut alice = SmpContext::new();
        let mut bob = SmpContext::new();

        let tlvs = alice.start(&secret(b"s"), None, &mut rng).unwrap();
        let mut msg1 = Smp1::from_tlv(&tlvs[0]).unwrap();
        msg1.c2 += 1u32;

        let step = bob.receive(&msg1.to_tlv(), &mut rng);
        assert_eq!(step.event, Some(SmpEvent::Cheated));
        assert_eq!(step.reply, Some(Tlv::empty(TlvType::SmpAbort)));
        assert_eq!(
            step.failure,
            Some(CoreError::ZkpVerificationFailed { proof: "g2a" })
        );
        assert_eq!(bob.state_kind(), SmpStateKind::Expect1);
    }

    #[test]
    fn test_tampered_msg2_is_cheating() {
        let mut rng = ChaCha20Rng::seed_from_u64(43);
        let mut alice = SmpContext::new();
        let mut bob = SmpContext::new();

        let tlvs = alice.start(&secret(b"s"), None, &mut rng).unwrap();
        bob.receive(&tlvs[0], &mut rng);
        let msg2 = bob.provide_secret(&secret(b"s"), &mut rng).unwrap();
        let mut msg2 = Smp2::from_tlv(&msg2).unwrap();
        msg2.d6 = sub_mod(&msg2.d6, &BigUint::from(1u32), order());

        let step = alice.receive(&msg2.to_tlv(), &mut rng);
        assert_eq!(step.event, Some(SmpEvent::Cheated));
        assert!(step.failure.is_some());
        assert_eq!(alice.state_kind(), SmpStateKind::Expect1);
    }

    #[test]
    fn test_out_of_order_message_aborts() {
        let mut rng = ChaCha20Rng::seed_from_u64(44);
        let mut bob = SmpContext::new();
        let tlv = Smp4 {
            rb: BigUint::from(4u32),
            cr: BigUint::from(1u32),
            d7: BigUint::from(1u32),
        }
        .to_tlv();

        let step = bob.receive(&tlv, &mut rng);
        assert_eq!(step.event, Some(SmpEvent::Error));
        assert_eq!(step.reply, Some(Tlv::empty(TlvType::SmpAbort)));
        assert!(matches!(
            step.failure,
            Some(CoreError::UnexpectedMessage { .. })
        ));
        assert_eq!(bob.state_kind(), SmpStateKind::Expect1);
    }

    #[test]
    fn test_second_msg1_while_waiting_aborts() {
        let mut rng = ChaCha20Rng::seed_from_u64(45);
        let mut alice = SmpContext::new();
        let mut bob = SmpContext::new();
        let tlvs = alice.start(&secret(b"s"), None, &mut rng).unwrap();
        bob.receive(&tlvs[0], &mut rng);

        let step = bob.receive(&tlvs[0], &mut rng);
        assert_eq!(step.event, Some(SmpEvent::Error));
        assert_eq!(bob.state_kind(), SmpStateKind::Expect1);
    }

    #[test]
    fn test_peer_abort_resets() {
        let mut rng = ChaCha20Rng::seed_from_u64(46);
        let mut alice = SmpContext::new();
        alice.start(&secret(b"s"), None, &mut rng).unwrap();
        assert!(alice.in_progress());

        let step = alice.receive(&Tlv::empty(TlvType::SmpAbort), &mut rng);
        assert_eq!(step.event, Some(SmpEvent::Aborted));
        assert!(step.reply.is_none());
        assert!(!alice.in_progress());
    }

    #[test]
    fn test_restart_emits_leading_abort() {
        let mut rng = ChaCha20Rng::seed_from_u64(47);
        let mut alice = SmpContext::new();
        alice.start(&secret(b"s"), None, &mut rng).unwrap();

        let tlvs = alice.start(&secret(b"t"), None, &mut rng).unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].tlv_type, TlvType::SmpAbort);
        assert_eq!(tlvs[1].tlv_type, TlvType::Smp1);
        assert_eq!(alice.state_kind(), SmpStateKind::Expect2);
    }

    #[test]
    fn test_provide_secret_requires_msg1() {
        let mut rng = ChaCha20Rng::seed_from_u64(48);
        let mut bob = SmpContext::new();
        let err = bob.provide_secret(&secret(b"s"), &mut rng).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn test_short_read_on_start() {
        let mut alice = SmpContext::new();
        let err = alice.start(&secret(b"s"), None, &mut FailingRng).unwrap_err();
        assert!(matches!(err, CoreError::ShortRandomRead { .. }));
        assert_eq!(alice.state_kind(), SmpStateKind::Expect1);
    }

    #[test]
    fn test_short_read_on_restart_leaves_abort_pending() {
        let mut rng = ChaCha20Rng::seed_from_u64(50);
        let mut alice = SmpContext::new();
        alice.start(&secret(b"s"), None, &mut rng).unwrap();

        assert!(alice.start(&secret(b"t"), None, &mut FailingRng).is_err());
        assert_eq!(alice.state_kind(), SmpStateKind::Expect1);
        assert_eq!(
            alice.take_pending_abort(),
            Some(Tlv::empty(TlvType::SmpAbort))
        );
        assert!(alice.take_pending_abort().is_none());
    }

    #[test]
    fn test_restart_after_failed_start_still_aborts() {
        let mut rng = ChaCha20Rng::seed_from_u64(51);
        let mut alice = SmpContext::new();
        alice.start(&secret(b"s"), None, &mut rng).unwrap();
        assert!(alice.start(&secret(b"t"), None, &mut FailingRng).is_err());

        let tlvs = alice.start(&secret(b"t"), None, &mut rng).unwrap();
        assert_eq!(tlvs[0].tlv_type, TlvType::SmpAbort);
        assert!(alice.take_pending_abort().is_none());
    }

    #[test]
    fn test_short_read_on_answer_leaves_abort_pending() {
        let mut rng = ChaCha20Rng::seed_from_u64(52);
        let mut alice = SmpContext::new();
        let mut bob = SmpContext::new();
        let tlvs = alice.start(&secret(b"s"), None, &mut rng).unwrap();
        bob.receive(&tlvs[0], &mut rng);

        let err = bob.provide_secret(&secret(b"s"), &mut FailingRng).unwrap_err();
        assert!(matches!(err, CoreError::ShortRandomRead { .. }));
        assert_eq!(bob.state_kind(), SmpStateKind::Expect1);
        assert!(bob.take_pending_abort().is_some());
    }

    #[test]
    fn test_peer_message_clears_pending_abort() {
        let mut rng = ChaCha20Rng::seed_from_u64(53);
        let mut alice = SmpContext::new();
        let mut bob = SmpContext::new();
        let tlvs = alice.start(&secret(b"s"), None, &mut rng).unwrap();
        bob.receive(&tlvs[0], &mut rng);
        assert!(bob.provide_secret(&secret(b"s"), &mut FailingRng).is_err());

        let tlvs = alice.start(&secret(b"s"), None, &mut rng).unwrap();
        let step = bob.receive(tlvs.last().unwrap(), &mut rng);
        assert!(matches!(step.event, Some(SmpEvent::AskForSecret { .. })));
        assert!(bob.take_pending_abort().is_none());
    }

    #[test]
    fn test_challenge_comparison() {
        let c = BigUint::from(0xabcdu32);
        assert!(check_challenge(&c, &c.clone(), "c").is_ok());
        assert_eq!(
            check_challenge(&c, &(&c + 1u32), "c"),
            Err(CoreError::ZkpVerificationFailed { proof: "c" })
        );
        let oversized = BigUint::from(1u32) << 300;
        assert!(check_challenge(&oversized, &oversized, "c").is_err());
    }

    #[test]
    fn test_invalid_group_element_is_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(49);
        let mut alice = SmpContext::new();
        let mut bob = SmpContext::new();
        let tlvs = alice.start(&secret(b"s"), None, &mut rng).unwrap();
        let mut msg1 = Smp1::from_tlv(&tlvs[0]).unwrap();
        msg1.g3a = BigUint::from(1u32);

        let step = bob.receive(&msg1.to_tlv(), &mut rng);
        assert!(matches!(
            step.failure,
            Some(CoreError::InvalidGroupElement { .. })
        ));
        assert_eq!(bob.state_kind(), SmpStateKind::Expect1);
    }
}
