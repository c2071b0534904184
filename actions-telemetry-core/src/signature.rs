//! GitHub webhook signature verification
//!
//! GitHub signs every delivery with HMAC-SHA256 over the raw request body,
//! keyed by the webhook secret, and sends the result in the
//! `X-Hub-Signature-256` header as `sha256=<hex digest>`.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the HMAC-SHA256 signature of the delivery body
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Scheme prefix GitHub puts in front of the hex digest
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a webhook body against its signature header.
///
/// An empty `secret` disables verification entirely and always returns
/// `true`; callers are expected to log that they run unprotected. A missing
/// header, a header without the `sha256=` prefix, or a digest that differs
/// from the lowercase hex HMAC all return `false`.
pub fn verify(raw_body: &[u8], signature_header: Option<&str>, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let Some(header) = signature_header else {
        warn!(target: "security", "No signature header provided");
        return false;
    };

    let Some(hex_signature) = header.strip_prefix(SIGNATURE_PREFIX) else {
        warn!(target: "security", "Invalid signature format, expected {}", SIGNATURE_PREFIX);
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison of the lowercase hex digests
    let is_valid: bool = expected.as_bytes().ct_eq(hex_signature.as_bytes()).into();
    if !is_valid {
        warn!(target: "security", "Webhook signature validation failed");
    }
    is_valid
}

/// Compute the `sha256=<hex>` header value for a body.
///
/// Used by the CLI and by tests to produce signatures GitHub would send.
pub fn sign(raw_body: &[u8], secret: &str) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).context("Failed to create HMAC instance")?;
    mac.update(raw_body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}
