//! Compact `HS256` access tokens.
//!
//! Format: `base64url(header).base64url(claims).base64url(hmac_sha256)`. The
//! token is self-contained; verification needs only the shared secret and the
//! current time.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenHeader {
    pub alg: String,
    pub typ: String,
}

impl AccessTokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    pub v: u8,
    pub sub: i64,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AccessTokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid token version")]
    InvalidVersion,
    #[error("token expired")]
    Expired,
    #[error("signing key rejected")]
    Key,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, AccessTokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, AccessTokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| AccessTokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Signs and verifies access tokens with one shared HMAC secret.
pub struct AccessTokenSigner {
    secret: SecretSlice<u8>,
}

impl std::fmt::Debug for AccessTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenSigner").finish_non_exhaustive()
    }
}

impl AccessTokenSigner {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: SecretSlice::from(secret.to_vec()),
        }
    }

    fn mac(&self) -> Result<HmacSha256, AccessTokenError> {
        HmacSha256::new_from_slice(self.secret.expose_secret()).map_err(|_| AccessTokenError::Key)
    }

    /// Sign `claims` into a compact token.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be encoded.
    pub fn sign(&self, claims: &AccessTokenClaims) -> Result<String, AccessTokenError> {
        let header_b64 = b64e_json(&AccessTokenHeader::hs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a token and return its claims.
    ///
    /// The signature is checked before the claims are decoded, so nothing from an
    /// unauthenticated payload is trusted.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, the signature does not verify,
    /// or `exp` is not after `now_unix_seconds`.
    pub fn verify(
        &self,
        token: &str,
        now_unix_seconds: i64,
    ) -> Result<AccessTokenClaims, AccessTokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(AccessTokenError::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(AccessTokenError::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(AccessTokenError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(AccessTokenError::TokenFormat);
        }

        let header: AccessTokenHeader = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(AccessTokenError::UnsupportedAlg(header.alg));
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| AccessTokenError::Base64)?;
        let mut mac = self.mac()?;
        mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AccessTokenError::InvalidSignature)?;

        let claims: AccessTokenClaims = b64d_json(claims_b64)?;
        if claims.v != TOKEN_VERSION {
            return Err(AccessTokenError::InvalidVersion);
        }
        if claims.exp <= now_unix_seconds {
            return Err(AccessTokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn claims(sub: i64) -> AccessTokenClaims {
        AccessTokenClaims {
            v: TOKEN_VERSION,
            sub,
            iat: NOW,
            exp: NOW + 900,
        }
    }

    #[test]
    fn sign_and_verify() -> Result<(), AccessTokenError> {
        let signer = AccessTokenSigner::new(b"band-secret");
        let token = signer.sign(&claims(42))?;
        assert_eq!(token.split('.').count(), 3);

        let verified = signer.verify(&token, NOW + 1)?;
        assert_eq!(verified.sub, 42);
        assert_eq!(verified.exp, NOW + 900);
        Ok(())
    }

    #[test]
    fn rejects_expired() -> Result<(), AccessTokenError> {
        let signer = AccessTokenSigner::new(b"band-secret");
        let token = signer.sign(&claims(42))?;

        assert!(matches!(
            signer.verify(&token, NOW + 900),
            Err(AccessTokenError::Expired)
        ));
        Ok(())
    }

    #[test]
    fn rejects_flipped_signature_bits() -> Result<(), AccessTokenError> {
        let signer = AccessTokenSigner::new(b"band-secret");
        let token = signer.sign(&claims(42))?;
        let (input, sig_b64) = token.rsplit_once('.').ok_or(AccessTokenError::TokenFormat)?;
        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| AccessTokenError::Base64)?;

        for index in 0..signature.len() {
            let mut flipped = signature.clone();
            flipped[index] ^= 0x01;
            let tampered = format!("{input}.{}", Base64UrlUnpadded::encode_string(&flipped));
            assert!(matches!(
                signer.verify(&tampered, NOW),
                Err(AccessTokenError::InvalidSignature)
            ));
        }
        Ok(())
    }

    #[test]
    fn rejects_forged_claims() -> Result<(), AccessTokenError> {
        let signer = AccessTokenSigner::new(b"band-secret");
        let token = signer.sign(&claims(42))?;
        let forged = b64e_json(&claims(1))?;
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged;

        assert!(matches!(
            signer.verify(&parts.join("."), NOW),
            Err(AccessTokenError::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn rejects_other_secret_and_garbage() -> Result<(), AccessTokenError> {
        let signer = AccessTokenSigner::new(b"band-secret");
        let other = AccessTokenSigner::new(b"another-secret");
        let token = signer.sign(&claims(42))?;

        assert!(other.verify(&token, NOW).is_err());
        assert!(signer.verify("", NOW).is_err());
        assert!(signer.verify("a.b", NOW).is_err());
        assert!(signer.verify("a.b.c.d", NOW).is_err());
        assert!(signer.verify("not.base64!.sig", NOW).is_err());
        Ok(())
    }
}
