//! Token codec (component A): generation, structural validation, and the
//! obfuscated display form.
//!
//! A token is the literal prefix `sk-` followed by the unpadded URL-safe
//! base64 encoding of a version-7 (time-ordered) UUID's 16 bytes. Total
//! length is always 25 bytes; charset is `[A-Za-z0-9_-]`.

use crate::error::{ProxyError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use uuid::Uuid;

const PREFIX: &str = "sk-";
const TOKEN_LEN: usize = 25;
const BODY_LEN: usize = TOKEN_LEN - 3;

/// Generates a new opaque proxy token. Never logged by callers.
pub fn generate_token() -> String {
    let id = Uuid::now_v7();
    let body = URL_SAFE_NO_PAD.encode(id.as_bytes());
    format!("{PREFIX}{body}")
}

/// Checks the structural shape of a token string without decoding it: exact
/// length, literal prefix, and charset. Fails fast before any base64 work.
pub fn validate_format(token: &str) -> Result<()> {
    if token.len() != TOKEN_LEN || !token.starts_with(PREFIX) {
        return Err(ProxyError::InvalidTokenFormat);
    }
    let body = &token[PREFIX.len()..];
    if !body.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return Err(ProxyError::InvalidTokenFormat);
    }
    decode_token(token).map(|_| ())
}

/// Recovers the UUID encoded in a token's body. Performs the base64
/// round-trip; a malformed body (wrong padding, wrong decoded length)
/// yields `invalid_token_format`.
pub fn decode_token(token: &str) -> Result<Uuid> {
    if token.len() != TOKEN_LEN || !token.starts_with(PREFIX) {
        return Err(ProxyError::InvalidTokenFormat);
    }
    let body = &token[PREFIX.len()..];
    if body.len() != BODY_LEN {
        return Err(ProxyError::InvalidTokenFormat);
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| ProxyError::InvalidTokenFormat)?;
    let bytes: [u8; 16] = bytes.try_into().map_err(|_| ProxyError::InvalidTokenFormat)?;
    Ok(Uuid::from_bytes(bytes))
}

/// Display form used anywhere a token id would otherwise leak into a log
/// line or event: `sk-XXXX****YYYY`, first 4 + last 4 of the secret body.
pub fn obfuscate_token(token: &str) -> String {
    let body = token.strip_prefix(PREFIX).unwrap_or(token);
    if body.len() <= 8 {
        return format!("{PREFIX}****");
    }
    let head = &body[..4];
    let tail = &body[body.len() - 4..];
    format!("{PREFIX}{head}****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_has_exact_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.starts_with(PREFIX));
        assert!(validate_format(&token).is_ok());
    }

    #[test]
    fn round_trip_decodes_to_16_byte_uuid() {
        let token = generate_token();
        let uuid = decode_token(&token).unwrap();
        assert_eq!(uuid.as_bytes().len(), 16);
        assert_eq!(uuid.get_version_num(), 7);
    }

    #[test]
    fn truncated_token_fails_validation() {
        let mut token = generate_token();
        token.pop();
        assert!(validate_format(&token).is_err());
    }

    #[test]
    fn wrong_prefix_fails() {
        let mut token = generate_token();
        token.replace_range(0..3, "xx-");
        assert!(validate_format(&token).is_err());
    }

    #[test]
    fn invalid_charset_fails() {
        let mut token = generate_token();
        token.replace_range(5..6, "!");
        assert!(validate_format(&token).is_err());
    }

    #[test]
    fn obfuscate_keeps_only_head_and_tail_of_body() {
        let token = "sk-AAAABBBBCCCCDDDDEEEEzz";
        assert_eq!(obfuscate_token(token), "sk-AAAA****EEzz");
    }
}
