//! Webhook signature helpers (Standard Webhooks scheme).
//!
//! Signed content is `"{webhook_id}.{timestamp}.{body}"`, signed with
//! HMAC-SHA256 and base64-encoded. The signature header carries one or more
//! space-separated `v1,<base64>` entries. Secrets may be given with the
//! `whsec_` prefix, in which case the remainder is the base64 key.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

fn secret_bytes(secret: &str) -> Result<Vec<u8>, anyhow::Error> {
    match secret.strip_prefix(SECRET_PREFIX) {
        Some(encoded) => STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Invalid webhook secret encoding: {}", e)),
        None => Ok(secret.as_bytes().to_vec()),
    }
}

fn webhook_mac(secret: &str, webhook_id: &str, timestamp: i64, body: &[u8]) -> anyhow::Result<HmacSha256> {
    let key = secret_bytes(secret)?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(format!("{}.{}.", webhook_id, timestamp).as_bytes());
    mac.update(body);
    Ok(mac)
}

/// Produce a `v1,<base64>` signature for a webhook delivery.
pub fn sign_webhook(
    secret: &str,
    webhook_id: &str,
    timestamp: i64,
    body: &[u8],
) -> Result<String, anyhow::Error> {
    let mac = webhook_mac(secret, webhook_id, timestamp, body)?;
    Ok(format!(
        "{},{}",
        SIGNATURE_VERSION,
        STANDARD.encode(mac.finalize().into_bytes())
    ))
}

/// Check a signature header against the delivery. Any matching `v1` entry is accepted.
pub fn verify_webhook(
    secret: &str,
    webhook_id: &str,
    timestamp: i64,
    body: &[u8],
    signature_header: &str,
) -> Result<bool, anyhow::Error> {
    let mac = webhook_mac(secret, webhook_id, timestamp, body)?;
    let expected = mac.finalize().into_bytes();

    let matched = signature_header
        .split_whitespace()
        .filter_map(|entry| entry.split_once(','))
        .filter(|(version, _)| *version == SIGNATURE_VERSION)
        .filter_map(|(_, encoded)| STANDARD.decode(encoded).ok())
        .any(|candidate| constant_time_eq(&candidate, &expected));

    Ok(matched)
}

/// Length-checked constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
