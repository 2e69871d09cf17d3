//! Webhook signature verification.
//!
//! The provider signs each delivery with HMAC-SHA256 over the raw body
//! using the shared secret, and sends the hex digest in the
//! `X-Webhook-Signature` header. Verification recomputes the digest and
//! compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded HMAC of the raw request body
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Compute the hex HMAC-SHA256 of `body` under `secret`.
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| HmacSha256::new_from_slice(b"fallback").unwrap());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a provided signature against the raw body.
#[must_use]
pub fn verify(secret: &str, body: &[u8], provided: &str) -> bool {
    let expected = sign(secret, body);
    constant_time_eq(&expected, provided)
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
