//! Auth state and configuration.

use std::sync::Arc;

use super::{
    access_token::AccessTokenSigner,
    credentials::CredentialManager,
    hasher::{Passwords, SecretHasher},
    storage::{RefreshStore, UserStore},
};

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_REFRESH_TOKEN_RETENTION: usize = 3;
const DEFAULT_REFRESH_SWEEP_SECONDS: u64 = 60 * 60;
pub const MAX_ACCESS_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const MAX_REFRESH_TOKEN_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    refresh_token_retention: usize,
    refresh_sweep_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            refresh_token_retention: DEFAULT_REFRESH_TOKEN_RETENTION,
            refresh_sweep_seconds: DEFAULT_REFRESH_SWEEP_SECONDS,
        }
    }

    /// Clamped to `1..=MAX_ACCESS_TOKEN_TTL_SECONDS`.
    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds.clamp(1, MAX_ACCESS_TOKEN_TTL_SECONDS);
        self
    }

    /// Clamped to `1..=MAX_REFRESH_TOKEN_TTL_SECONDS`.
    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds.clamp(1, MAX_REFRESH_TOKEN_TTL_SECONDS);
        self
    }

    /// A retention of zero is treated as one: the freshly issued row always survives.
    #[must_use]
    pub fn with_refresh_token_retention(mut self, retention: usize) -> Self {
        self.refresh_token_retention = retention.max(1);
        self
    }

    #[must_use]
    pub fn with_refresh_sweep_seconds(mut self, seconds: u64) -> Self {
        self.refresh_sweep_seconds = seconds;
        self
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_retention(&self) -> usize {
        self.refresh_token_retention
    }

    /// Interval of the expired-refresh-token sweep; zero disables it.
    #[must_use]
    pub fn refresh_sweep_seconds(&self) -> u64 {
        self.refresh_sweep_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    credentials: CredentialManager,
    users: Arc<dyn UserStore>,
    passwords: Passwords,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        signer: AccessTokenSigner,
        hasher: SecretHasher,
        refresh_store: Arc<dyn RefreshStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let credentials = CredentialManager::new(&config, signer, hasher.clone(), refresh_store);
        Self {
            config,
            credentials,
            users,
            passwords: Passwords::new(hasher),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub(crate) fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    pub(crate) fn passwords(&self) -> &Passwords {
        &self.passwords
    }
}
