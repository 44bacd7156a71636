//! Session credential lifecycle: issue, verify, rotate and revoke.
//!
//! Flow Overview:
//! 1) `issue_session` signs an access token and stores the slow hash of a fresh
//!    refresh secret; the plaintext is handed back once and never kept.
//! 2) `verify_access` is pure: signature plus expiry, every failure collapses
//!    to `Unauthenticated`.
//! 3) `refresh_session` redeems a refresh secret exactly once. The store's
//!    compare-and-delete decides the winner when the same secret races.
//! 4) `revoke_one` / `revoke_all` delete rows; a missing row is not an error.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    access_token::{AccessTokenClaims, AccessTokenError, AccessTokenSigner, TOKEN_VERSION},
    hasher::{HashError, SecretHasher},
    state::AuthConfig,
    storage::{NewRefreshCredential, RefreshStore, StoreError, StoredRefreshCredential},
    utils::{generate_refresh_token, refresh_lookup_key},
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("refresh token expired")]
    RefreshTokenExpired,
    #[error("failed to sign access token: {0}")]
    Signing(#[from] AccessTokenError),
    #[error("failed to hash refresh token: {0}")]
    Hash(#[from] HashError),
    #[error("failed to generate refresh token")]
    Entropy,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Credentials handed to the client after login, signup or refresh.
pub struct IssuedSession {
    pub subject_id: i64,
    pub access_token: String,
    pub access_expires_at: i64,
    pub refresh_token: String,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("subject_id", &self.subject_id)
            .field("access_expires_at", &self.access_expires_at)
            .finish_non_exhaustive()
    }
}

pub struct CredentialManager {
    signer: AccessTokenSigner,
    hasher: SecretHasher,
    store: Arc<dyn RefreshStore>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    retention: usize,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        signer: AccessTokenSigner,
        hasher: SecretHasher,
        store: Arc<dyn RefreshStore>,
    ) -> Self {
        Self {
            signer,
            hasher,
            store,
            access_ttl: Duration::seconds(config.access_token_ttl_seconds()),
            refresh_ttl: Duration::seconds(config.refresh_token_ttl_seconds()),
            retention: config.refresh_token_retention(),
        }
    }

    fn sign_access(
        &self,
        subject_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(String, i64), AuthError> {
        let exp = (now + self.access_ttl).timestamp();
        let claims = AccessTokenClaims {
            v: TOKEN_VERSION,
            sub: subject_id,
            iat: now.timestamp(),
            exp,
        };
        Ok((self.signer.sign(&claims)?, exp))
    }

    async fn new_refresh_credential(
        &self,
        owner_id: i64,
        now: DateTime<Utc>,
        last_used_at: Option<DateTime<Utc>>,
    ) -> Result<(String, NewRefreshCredential), AuthError> {
        let plaintext = generate_refresh_token().map_err(|_| AuthError::Entropy)?;
        let credential = NewRefreshCredential {
            owner_id,
            lookup_key: refresh_lookup_key(&plaintext),
            secret_hash: self.hasher.hash_async(plaintext.clone()).await?,
            expires_at: now + self.refresh_ttl,
            last_used_at,
        };
        Ok((plaintext, credential))
    }

    async fn first_match(
        &self,
        refresh_token: &str,
        rows: Vec<StoredRefreshCredential>,
    ) -> Option<StoredRefreshCredential> {
        for row in rows {
            if self
                .hasher
                .verify_async(refresh_token.to_string(), row.secret_hash.clone())
                .await
            {
                return Some(row);
            }
        }
        None
    }

    /// Issue a fresh access/refresh pair for `subject_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing, hashing or the store fails.
    pub async fn issue_session(&self, subject_id: i64) -> Result<IssuedSession, AuthError> {
        let now = Utc::now();
        let (access_token, access_expires_at) = self.sign_access(subject_id, now)?;
        let (refresh_token, credential) = self
            .new_refresh_credential(subject_id, now, None)
            .await?;

        self.store.insert(credential, self.retention).await?;
        debug!(subject_id, "issued session");

        Ok(IssuedSession {
            subject_id,
            access_token,
            access_expires_at,
            refresh_token,
        })
    }

    /// Resolve an access token to its subject.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthenticated` for any malformed, forged or expired token.
    pub fn verify_access(&self, token: &str) -> Result<i64, AuthError> {
        self.verify_access_at(token, Utc::now().timestamp())
    }

    pub(crate) fn verify_access_at(&self, token: &str, now: i64) -> Result<i64, AuthError> {
        match self.signer.verify(token, now) {
            Ok(claims) => Ok(claims.sub),
            Err(err) => {
                debug!("access token rejected: {err}");
                Err(AuthError::Unauthenticated)
            }
        }
    }

    /// Redeem a refresh secret for a new pair, invalidating the presented one.
    ///
    /// # Errors
    ///
    /// `InvalidRefreshToken` when nothing matches or a concurrent redemption won,
    /// `RefreshTokenExpired` when the matching row has expired (the row is removed).
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<IssuedSession, AuthError> {
        let now = Utc::now();
        let candidates = self
            .store
            .find_by_lookup_key(&refresh_lookup_key(refresh_token))
            .await?;

        let Some(matched) = self.first_match(refresh_token, candidates).await else {
            return Err(AuthError::InvalidRefreshToken);
        };

        if matched.expires_at <= now {
            self.store.delete_by_hash(&matched.secret_hash).await?;
            debug!(owner_id = matched.owner_id, "expired refresh token removed");
            return Err(AuthError::RefreshTokenExpired);
        }

        let (refresh_plaintext, replacement) = self
            .new_refresh_credential(matched.owner_id, now, Some(now))
            .await?;

        if !self
            .store
            .rotate(&matched.secret_hash, replacement, self.retention)
            .await?
        {
            warn!(
                owner_id = matched.owner_id,
                "refresh token already rotated by a concurrent request"
            );
            return Err(AuthError::InvalidRefreshToken);
        }

        let (access_token, access_expires_at) = self.sign_access(matched.owner_id, now)?;

        Ok(IssuedSession {
            subject_id: matched.owner_id,
            access_token,
            access_expires_at,
            refresh_token: refresh_plaintext,
        })
    }

    /// Delete the refresh credential of `owner_id` matching `refresh_token`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub async fn revoke_one(&self, refresh_token: &str, owner_id: i64) -> Result<(), AuthError> {
        let rows = self.store.find_by_owner(owner_id).await?;
        if let Some(row) = self.first_match(refresh_token, rows).await {
            self.store.delete_by_hash(&row.secret_hash).await?;
            debug!(owner_id, "refresh token revoked");
        }
        Ok(())
    }

    /// Delete every refresh credential of `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub async fn revoke_all(&self, owner_id: i64) -> Result<u64, AuthError> {
        let deleted = self.store.delete_all_by_owner(owner_id).await?;
        debug!(owner_id, deleted, "all refresh tokens revoked");
        Ok(deleted)
    }

    /// Remove refresh credentials whose expiry has passed.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub async fn prune_expired(&self) -> Result<u64, AuthError> {
        Ok(self.store.prune_expired(Utc::now()).await?)
    }
}
