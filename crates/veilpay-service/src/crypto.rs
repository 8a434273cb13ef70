//! Cryptographic utilities for IPN signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Compute HMAC-SHA512 and return the hex-encoded result (128 chars).
///
/// # Panics
///
/// This function will never panic in practice. The `expect` call is
/// guarded by the invariant that HMAC accepts keys of any size per
/// RFC 2104.
#[must_use]
pub fn hmac_sha512_hex(secret: &str, message: &str) -> String {
    // INVARIANT: HMAC-SHA512 accepts keys of any size per RFC 2104, so
    // `new_from_slice` only fails if the Hmac implementation is broken.
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC-SHA512 accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks when
/// verifying signatures.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Re-serialize a JSON body with lexicographically sorted keys, the
/// canonical form NowPayments signs. `serde_json`'s default map is
/// ordered, so parse-then-serialize sorts every object level.
///
/// # Errors
///
/// Returns the underlying parse error for non-JSON input.
pub fn canonical_json(raw: &str) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha512_produces_correct_length() {
        let result = hmac_sha512_hex("key", "The quick brown fox jumps over the lazy dog");
        assert_eq!(result.len(), 128); // SHA512 = 64 bytes = 128 hex chars
    }

    #[test]
    fn hmac_sha512_is_deterministic() {
        assert_eq!(
            hmac_sha512_hex("secret", "message"),
            hmac_sha512_hex("secret", "message")
        );
        assert_ne!(
            hmac_sha512_hex("secret", "message1"),
            hmac_sha512_hex("secret", "message2")
        );
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("abc", "ABC"));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let raw = r#"{"b":1,"a":{"z":true,"y":false}}"#;
        assert_eq!(
            canonical_json(raw).unwrap(),
            r#"{"a":{"y":false,"z":true},"b":1}"#
        );
    }

    #[test]
    fn canonical_json_rejects_garbage() {
        assert!(canonical_json("not json").is_err());
    }
}
