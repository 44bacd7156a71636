//! Slow one-way hashing for passwords and refresh secrets.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters")]
    Params,
    #[error("failed to hash secret")]
    Hash,
    #[error("hashing task failed")]
    Task,
}

/// Argon2id hasher producing PHC strings with a random salt per call.
#[derive(Clone, Debug)]
pub struct SecretHasher {
    params: Params,
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl SecretHasher {
    /// Build a hasher with explicit cost parameters (memory in KiB, iterations, lanes).
    ///
    /// # Errors
    ///
    /// Returns an error if argon2 rejects the parameters.
    pub fn with_cost(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, HashError> {
        let params = Params::new(m_cost, t_cost, p_cost, None).map_err(|_| HashError::Params)?;
        Ok(Self { params })
    }

    /// Cheapest parameters argon2 accepts. Only for tests.
    #[must_use]
    pub fn insecure_fast() -> Self {
        Self {
            params: Params::new(Params::MIN_M_COST, 1, 1, None).unwrap_or_default(),
        }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `plaintext` into a PHC string.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails.
    pub fn hash(&self, plaintext: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| HashError::Hash)
    }

    /// Check `plaintext` against a stored PHC string. Malformed hashes never match.
    #[must_use]
    pub fn verify(&self, plaintext: &str, stored_hash: &str) -> bool {
        PasswordHash::new(stored_hash).is_ok_and(|parsed| {
            // Parameters are read from the PHC string, not from `self`.
            self.argon2()
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok()
        })
    }
    /// `hash` on the tokio blocking pool.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails or the task is cancelled.
    pub async fn hash_async(&self, plaintext: String) -> Result<String, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|_| HashError::Task)?
    }

    /// `verify` on the blocking pool. A failed task never matches.
    pub async fn verify_async(&self, plaintext: String, stored_hash: String) -> bool {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &stored_hash))
            .await
            .unwrap_or(false)
    }
}

/// `hash_password`/`check_password_hash` pair used by login and signup.
#[derive(Clone, Debug, Default)]
pub struct Passwords {
    hasher: SecretHasher,
    // Verified against when the username is unknown so both paths cost the same.
    decoy_hash: Option<String>,
}

impl Passwords {
    #[must_use]
    pub fn new(hasher: SecretHasher) -> Self {
        let decoy_hash = hasher.hash("decoy-password").ok();
        Self { hasher, decoy_hash }
    }

    /// # Errors
    ///
    /// Returns an error if hashing fails.
    pub async fn hash_password(&self, plaintext: String) -> Result<String, HashError> {
        self.hasher.hash_async(plaintext).await
    }

    pub async fn check_password_hash(&self, plaintext: String, hash: String) -> bool {
        self.hasher.verify_async(plaintext, hash).await
    }

    /// Burn one verification worth of work for a username that does not exist.
    pub async fn check_decoy(&self, plaintext: String) {
        if let Some(decoy) = &self.decoy_hash {
            let _ = self.hasher.verify_async(plaintext, decoy.clone()).await;
        }
    }
}
