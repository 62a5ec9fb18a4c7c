//! Access token expiry from the JWT `exp` claim
//!
//! The signature is not verified: the value only schedules proactive renewal,
//! and the backend remains the authority on token validity.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Read `exp` (seconds) from a JWT payload and return it as unix milliseconds.
///
/// Returns `None` for opaque tokens, undecodable payloads, or a missing claim.
pub fn expiry_millis(token: &str) -> Option<u64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_u64()?;
    exp.checked_mul(1000)
}
