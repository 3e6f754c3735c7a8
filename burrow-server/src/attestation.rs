//! Attestation verification for the `register_tunnel` authentication path.
//!
//! An attestation proves control of an Ed25519 key pair over the message
//! `"burrow:register:<timestamp>:<requested_subdomain-or-empty>"`, bounded
//! by a clock-skew window on both sides — generalized from the
//! timestamp-tolerance check this relay already applied to its proxy-auth
//! header.

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use burrow_protocol::frame::Attestation;
use burrow_protocol::{Error, Result};

/// Build the exact message an attestation signs.
pub fn signed_message(timestamp: i64, requested_subdomain: Option<&str>) -> String {
    format!(
        "burrow:register:{}:{}",
        timestamp,
        requested_subdomain.unwrap_or("")
    )
}

/// Verify an attestation against the configured clock-skew bounds.
///
/// Returns the raw 32-byte public key on success.
pub fn verify(att: &Attestation, max_age_secs: i64, future_skew_secs: i64, now: i64) -> Result<Vec<u8>> {
    let age = now - att.timestamp;
    if age > max_age_secs || -age > future_skew_secs {
        return Err(Error::AttestationExpired);
    }

    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(&att.public_key)
        .map_err(|_| Error::InvalidSignature)?;
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(&att.signature)
        .map_err(|_| Error::InvalidSignature)?;

    let key_array: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidSignature)?;
    let sig_array: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidSignature)?;

    let verifying_key = VerifyingKey::from_bytes(&key_array).map_err(|_| Error::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_array);

    let message = signed_message(att.timestamp, att.requested_subdomain.as_deref());
    verifying_key
        .verify(message.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    Ok(key_bytes)
}

/// Outcome of a reservation-gate check against the external accounts
/// collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny,
}

/// The subdomain-reservation gate is an opaque collaborator call in this
/// core: it decides whether a given public key may claim a given
/// subdomain, beyond plain registry availability. The accounts module
/// that backs a real deployment is out of scope here.
pub trait ReservationGate: Send + Sync {
    fn check(&self, public_key: &[u8], subdomain: &str) -> GateDecision;
}

/// Default gate used when no accounts collaborator is wired in: every
/// syntactically valid, currently-unclaimed subdomain is allowed.
pub struct AllowAllGate;

impl ReservationGate for AllowAllGate {
    fn check(&self, _public_key: &[u8], _subdomain: &str) -> GateDecision {
        GateDecision::Allow
    }
}
