//! HMAC-SHA256 signatures for proxy-relayed webhook deliveries.
//!
//! The relay signs `"{timestamp}.{body}"` (or the bare body when it sends no
//! timestamp) and transmits the hex digest, optionally prefixed `sha256=`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookSignatureError {
    #[error("signature digest cannot be empty")]
    EmptyDigest,
    #[error("signature digest must have an even number of hex characters")]
    OddLength,
    #[error("invalid hex byte '{0}' in signature digest")]
    InvalidHex(String),
    #[error("webhook secret cannot be used as an hmac key")]
    InvalidKey,
    #[error("signature verification failed")]
    Mismatch,
}

pub fn verify_hmac_sha256_signature(
    secret: &str,
    timestamp: Option<&str>,
    body: &[u8],
    signature_header: &str,
) -> Result<(), WebhookSignatureError> {
    let trimmed = signature_header.trim();
    let digest_hex = trimmed.strip_prefix("sha256=").unwrap_or(trimmed);
    let signature_bytes = decode_hex(digest_hex)?;
    let mac = signing_mac(secret, timestamp, body)?;
    mac.verify_slice(&signature_bytes)
        .map_err(|_| WebhookSignatureError::Mismatch)
}

/// Computes the `sha256=<hex>` header value a relay would send.
pub fn sign_hmac_sha256(
    secret: &str,
    timestamp: Option<&str>,
    body: &[u8],
) -> Result<String, WebhookSignatureError> {
    let digest = signing_mac(secret, timestamp, body)?.finalize().into_bytes();
    Ok(format!(
        "sha256={}",
        digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>()
    ))
}

fn signing_mac(
    secret: &str,
    timestamp: Option<&str>,
    body: &[u8],
) -> Result<Hmac<Sha256>, WebhookSignatureError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookSignatureError::InvalidKey)?;
    if let Some(timestamp) = timestamp.map(str::trim).filter(|value| !value.is_empty()) {
        mac.update(timestamp.as_bytes());
        mac.update(b".");
    }
    mac.update(body);
    Ok(mac)
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, WebhookSignatureError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(WebhookSignatureError::EmptyDigest);
    }
    if trimmed.len() % 2 != 0 {
        return Err(WebhookSignatureError::OddLength);
    }
    let mut bytes = Vec::with_capacity(trimmed.len() / 2);
    let mut index = 0usize;
    while index < trimmed.len() {
        let next = index.saturating_add(2);
        let chunk = trimmed
            .get(index..next)
            .ok_or_else(|| WebhookSignatureError::InvalidHex(trimmed[index..].to_string()))?;
        let byte = u8::from_str_radix(chunk, 16)
            .map_err(|_| WebhookSignatureError::InvalidHex(chunk.to_string()))?;
        bytes.push(byte);
        index = next;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::{
        decode_hex, sign_hmac_sha256, verify_hmac_sha256_signature, WebhookSignatureError,
    };

    #[test]
    fn unit_signature_round_trips_with_and_without_prefix() {
        let body = br#"{"action":"created"}"#;
        let signature = sign_hmac_sha256("tenant-secret", Some("1700000000"), body).expect("sign");
        assert!(signature.starts_with("sha256="));
        assert!(
            verify_hmac_sha256_signature("tenant-secret", Some("1700000000"), body, &signature)
                .is_ok()
        );

        let bare = signature.trim_start_matches("sha256=");
        assert!(
            verify_hmac_sha256_signature("tenant-secret", Some("1700000000"), body, bare).is_ok()
        );
    }

    #[test]
    fn unit_wrong_secret_or_timestamp_is_rejected() {
        let body = b"payload";
        let signature = sign_hmac_sha256("secret-a", Some("1"), body).expect("sign");
        assert_eq!(
            verify_hmac_sha256_signature("secret-b", Some("1"), body, &signature),
            Err(WebhookSignatureError::Mismatch)
        );
        assert_eq!(
            verify_hmac_sha256_signature("secret-a", Some("2"), body, &signature),
            Err(WebhookSignatureError::Mismatch)
        );
        assert_eq!(
            verify_hmac_sha256_signature("secret-a", None, body, &signature),
            Err(WebhookSignatureError::Mismatch)
        );
    }

    #[test]
    fn regression_malformed_digest_is_reported_not_panicking() {
        assert_eq!(decode_hex(""), Err(WebhookSignatureError::EmptyDigest));
        assert_eq!(decode_hex("abc"), Err(WebhookSignatureError::OddLength));
        assert!(matches!(
            decode_hex("zz"),
            Err(WebhookSignatureError::InvalidHex(_))
        ));
        assert!(matches!(
            decode_hex("aé1"),
            Err(WebhookSignatureError::InvalidHex(_))
        ));
        assert_eq!(decode_hex("0aff").expect("hex"), vec![0x0a, 0xff]);
    }
}
