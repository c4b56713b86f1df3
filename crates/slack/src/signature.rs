//! Slack request signing (`X-Slack-Signature: v0=<hex>`).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const MAX_TIMESTAMP_SKEW_SECS: u64 = 300;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("slack signature must use v0=<hex> format")]
    UnsupportedVersion,
    #[error("signature digest is not valid hex: {0}")]
    InvalidDigest(String),
    #[error("invalid request timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("request timestamp skew {skew_secs}s exceeds {max_secs}s")]
    StaleTimestamp { skew_secs: u64, max_secs: u64 },
    #[error("signature verification failed")]
    Mismatch,
}

/// Checks a signed Events API request. `now_unix` is passed in so the replay
/// window can be tested without a wall clock.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now_unix: u64,
) -> Result<(), SignatureError> {
    validate_timestamp_skew(timestamp, now_unix, MAX_TIMESTAMP_SKEW_SECS)?;

    let digest_hex =
        signature.trim().strip_prefix("v0=").ok_or(SignatureError::UnsupportedVersion)?;
    let expected = decode_hex(digest_hex)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes())
        .map_err(|_| SignatureError::Mismatch)?;
    mac.update(b"v0:");
    mac.update(timestamp.trim().as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

fn validate_timestamp_skew(
    timestamp: &str,
    now_unix: u64,
    max_skew_secs: u64,
) -> Result<(), SignatureError> {
    let timestamp_secs = timestamp
        .trim()
        .parse::<u64>()
        .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_owned()))?;
    let skew_secs = now_unix.abs_diff(timestamp_secs);
    if skew_secs > max_skew_secs {
        return Err(SignatureError::StaleTimestamp { skew_secs, max_secs: max_skew_secs });
    }
    Ok(())
}

fn decode_hex(value: &str) -> Result<Vec<u8>, SignatureError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() % 2 != 0 {
        return Err(SignatureError::InvalidDigest(format!("odd or empty digest `{trimmed}`")));
    }

    trimmed
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| {
                    SignatureError::InvalidDigest(String::from_utf8_lossy(pair).into_owned())
                })
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn sign(signing_secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes()).expect("hmac key");
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let hex = digest.iter().map(|byte| format!("{byte:02x}")).collect::<String>();
    format!("v0={hex}")
}

#[cfg(test)]
mod tests {
    use super::{sign, verify_slack_signature, SignatureError};

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = br#"{"type":"event_callback","event_id":"Ev1"}"#;

    #[test]
    fn valid_signature_is_accepted() {
        let signature = sign(SECRET, "1730000000", BODY);

        let result = verify_slack_signature(SECRET, "1730000000", BODY, &signature, 1730000060);

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign(SECRET, "1730000000", BODY);

        let result = verify_slack_signature(SECRET, "1730000000", b"{}", &signature, 1730000000);

        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signature = sign("another-secret", "1730000000", BODY);

        let result = verify_slack_signature(SECRET, "1730000000", BODY, &signature, 1730000000);

        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn replayed_request_outside_window_is_rejected() {
        let signature = sign(SECRET, "1730000000", BODY);

        let result = verify_slack_signature(SECRET, "1730000000", BODY, &signature, 1730000301);

        assert_eq!(
            result,
            Err(SignatureError::StaleTimestamp { skew_secs: 301, max_secs: 300 })
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            verify_slack_signature(SECRET, "1730000000", BODY, "v1=abcd", 1730000000),
            Err(SignatureError::UnsupportedVersion)
        );
        assert!(matches!(
            verify_slack_signature(SECRET, "1730000000", BODY, "v0=zz", 1730000000),
            Err(SignatureError::InvalidDigest(_))
        ));
        assert!(matches!(
            verify_slack_signature(SECRET, "yesterday", BODY, "v0=00", 1730000000),
            Err(SignatureError::InvalidTimestamp(_))
        ));
    }
}
