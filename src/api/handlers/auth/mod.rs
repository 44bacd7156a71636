//! Auth handlers and supporting modules.
//!
//! This module owns the session lifecycle (signed access tokens paired with
//! rotating refresh tokens) and the adaptive limiter that guards login and
//! signup.
//!
//! ## Sessions
//!
//! - **Access token:** `HS256` compact token, 15 minutes by default, verified
//!   offline on every protected request.
//! - **Refresh token:** 256 random bits shown to the client once. Only an
//!   Argon2id hash is stored, next to a short non-secret lookup key. Each use
//!   rotates it; the old value never works again. At most 3 are kept per user.
//!
//! ## Rate Limiting
//!
//! Login and signup are limited per client IP:
//!
//! - **Bucket:** burst of 5, one token back every 12 seconds; an empty bucket
//!   answers 429 with `Retry-After: 60`.
//! - **Escalation:** 5, 10 and 15 consecutive 401s block the client for 1, 5
//!   and 15 minutes. Any successful response clears the record.
//!
//! > **Warning:** the client IP is taken from `X-Forwarded-For` / `X-Real-IP`
//! > when present. Deploy behind a proxy that overwrites those headers.

mod access_token;
mod credentials;
mod hasher;
pub(crate) mod login;
mod memory;
pub(crate) mod middleware;
pub(crate) mod principal;
mod rate_limit;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod types;
mod utils;

pub use access_token::{AccessTokenError, AccessTokenSigner};
pub use credentials::{AuthError, CredentialManager, IssuedSession};
pub use hasher::{HashError, Passwords, SecretHasher};
pub use memory::{MemoryRefreshStore, MemoryUserStore};
pub use rate_limit::{AdaptiveLimiter, Decision, Outcome, RateLimitConfig};
pub use state::{
    AuthConfig, AuthState, MAX_ACCESS_TOKEN_TTL_SECONDS, MAX_REFRESH_TOKEN_TTL_SECONDS,
};
pub use storage::{
    NewRefreshCredential, PgStore, RefreshStore, StoreError, StoredRefreshCredential, UserRecord,
    UserStore,
};
pub(crate) use utils::valid_password;

#[cfg(test)]
mod tests;
