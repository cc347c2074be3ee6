//! Public-key handling for the challenge-response login.
//!
//! Clients register a minimal RSA JWK. The stored form is a canonical JSON
//! string with a fixed field order, so key equality is byte equality and the
//! login lookup can compare TEXT columns directly.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::rngs::OsRng;
use rsa::{BigUint, Oaep, RsaPublicKey};
use sha2::Sha256;

use crate::error::ApiError;

/// Parse an incoming JWK string and return the canonical stored form.
///
/// Accepts any JSON object carrying `kty: "RSA"` with base64url `n` and `e`;
/// every other field is ignored. `n`/`e` are decoded and re-encoded, so
/// padded and unpadded encodings of the same key canonicalize identically.
pub fn canonicalize_jwk(raw: &str) -> Result<String, ApiError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| invalid_key())?;
    let obj = value.as_object().ok_or_else(invalid_key)?;

    let kty = obj.get("kty").and_then(|v| v.as_str()).ok_or_else(invalid_key)?;
    if kty != "RSA" {
        return Err(invalid_key());
    }
    let n = decode_b64url_field(obj, "n")?;
    let e = decode_b64url_field(obj, "e")?;
    if n.is_empty() || e.is_empty() {
        return Err(invalid_key());
    }

    Ok(format!(
        "{{\"ext\":true,\"key_ops\":[\"encrypt\"],\"kty\":\"RSA\",\"n\":\"{}\",\"e\":\"{}\"}}",
        URL_SAFE_NO_PAD.encode(&n),
        URL_SAFE_NO_PAD.encode(&e),
    ))
}

/// Encrypt a login nonce to the stored public key with RSA-OAEP-SHA256.
/// Returns standard base64 of the ciphertext.
pub fn encrypt_challenge(canonical_jwk: &str, nonce: &[u8]) -> Result<String, ApiError> {
    let value: serde_json::Value =
        serde_json::from_str(canonical_jwk).map_err(|_| invalid_key())?;
    let obj = value.as_object().ok_or_else(invalid_key)?;
    let n = decode_b64url_field(obj, "n")?;
    let e = decode_b64url_field(obj, "e")?;

    let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|_| invalid_key())?;
    let ciphertext = key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), nonce)
        .map_err(|_| invalid_key())?;
    Ok(STANDARD.encode(ciphertext))
}

fn decode_b64url_field(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Result<Vec<u8>, ApiError> {
    let raw = obj.get(field).and_then(|v| v.as_str()).ok_or_else(invalid_key)?;
    // Tolerate padded input; the canonical form is unpadded.
    URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|_| invalid_key())
}

fn invalid_key() -> ApiError {
    ApiError::Validation("invalid public key".to_string())
}
