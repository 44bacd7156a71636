//! # Backstage (session authority for band setlists)
//!
//! `backstage` fronts the band/setlist REST backend with two cooperating
//! pieces: a credential manager that issues, verifies, rotates and revokes
//! session credentials, and an adaptive request limiter that throttles
//! authentication traffic per client.
//!
//! ## Credentials
//!
//! A login yields a short-lived `HS256` access token and a long-lived opaque
//! refresh token. Only an Argon2id hash of the refresh token is stored, next to
//! a non-secret lookup key. Refresh tokens rotate on use: redeeming one deletes
//! it in the same transaction that stores its replacement, so a captured token
//! can be replayed at most once (and only if the legitimate client has not used
//! it first). At most three refresh tokens are kept per user.
//!
//! ## Adaptive rate limiting
//!
//! Login and signup are wrapped by a per-client token bucket. Independently,
//! consecutive `401` responses escalate a temporary lockout (1, 5 and then 15
//! minutes); a successful authentication clears it.
//!
//! Client identity comes from `X-Forwarded-For` when present. Deployments must
//! strip untrusted forwarding headers upstream, otherwise a client can pick its
//! own identity.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
