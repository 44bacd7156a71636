//! Small helpers for token material, request headers and signup validation.

use anyhow::{Context, Result};
use axum::http::{HeaderMap, header::AUTHORIZATION};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

const REFRESH_TOKEN_BYTES: usize = 32;
const LOOKUP_KEY_BYTES: usize = 8;

/// Create a new refresh token.
/// The raw value is only returned to the client; the database stores a slow hash.
pub(crate) fn generate_refresh_token() -> Result<String> {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Non-secret index for a refresh token: the first bytes of its SHA-256, hex encoded.
///
/// Narrows the rows that need an Argon2 comparison without revealing the token.
pub(crate) fn refresh_lookup_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest[..LOOKUP_KEY_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Extract the client identity for rate limiting.
///
/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
/// Forwarding headers are trusted as-is; they must be sanitized upstream.
pub(crate) fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(super) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_]{3,50}$").is_ok_and(|regex| regex.is_match(username))
}

/// At least 8 characters with an uppercase letter, a digit and a symbol.
pub(crate) fn valid_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(char::is_uppercase)
        && password.chars().any(|ch| ch.is_ascii_digit())
        && password
            .chars()
            .any(|ch| ch.is_ascii_punctuation() || (!ch.is_alphanumeric() && !ch.is_whitespace()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn generate_refresh_token_has_256_bits() {
        let decoded_len = generate_refresh_token()
            .ok()
            .and_then(|token| Base64UrlUnpadded::decode_vec(&token).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn refresh_tokens_are_unique() {
        let first = generate_refresh_token().ok();
        let second = generate_refresh_token().ok();
        assert!(first.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn lookup_key_is_stable_hex_prefix() {
        let first = refresh_lookup_key("token");
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, refresh_lookup_key("token"));
        assert_ne!(first, refresh_lookup_key("other"));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(
            extract_client_ip(&headers, None),
            Some("1.2.3.4".to_string())
        );
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip_then_peer() {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 4242);

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(
            extract_client_ip(&headers, Some(peer)),
            Some("9.9.9.9".to_string())
        );

        let headers = HeaderMap::new();
        assert_eq!(
            extract_client_ip(&headers, Some(peer)),
            Some("10.0.0.7".to_string())
        );
        assert_eq!(extract_client_ip(&headers, None), None);
    }

    #[test]
    fn extract_bearer_token_variants() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn username_rules() {
        assert!(valid_username("drummer_42"));
        assert!(!valid_username("ab"));
        assert!(!valid_username("no spaces"));
        assert!(!valid_username(&"x".repeat(51)));
    }

    #[test]
    fn password_rules() {
        assert!(valid_password("Backl1ne!"));
        assert!(!valid_password("Sh0rt!"));
        assert!(!valid_password("backl1ne!"));
        assert!(!valid_password("Backline!"));
        assert!(!valid_password("Backl1ne1"));
    }
}
