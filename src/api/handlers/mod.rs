//! API handlers for backstage.
//!
//! `auth` owns sessions and the login limiter; `me` holds the endpoints that
//! need an authenticated principal; `health` reports build and database state.

pub mod auth;
pub mod health;
pub mod me;
