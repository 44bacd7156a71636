//! Adaptive per-client rate limiting for login and signup.
//!
//! Flow Overview:
//! 1) `admit` rejects while a client is blocked, otherwise takes one token from
//!    the client's bucket.
//! 2) `observe` feeds the handler's outcome back: consecutive authentication
//!    failures escalate a temporary block, a success clears it.
//!
//! State is kept per client identity in a `DashMap` of `Mutex`es. The map shard
//! is only locked to fetch the client's handle; the client's own lock covers the
//! bucket and failure counters, so distinct clients never contend.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_BURST: u32 = 5;
const DEFAULT_REPLENISH_SECONDS: u64 = 12;
const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

fn default_escalation() -> Vec<(u32, Duration)> {
    vec![
        (5, Duration::from_secs(60)),
        (10, Duration::from_secs(5 * 60)),
        (15, Duration::from_secs(15 * 60)),
    ]
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    enabled: bool,
    burst: u32,
    replenish: Duration,
    retry_after: Duration,
    idle_ttl: Option<Duration>,
    escalation: Vec<(u32, Duration)>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            burst: DEFAULT_BURST,
            replenish: Duration::from_secs(DEFAULT_REPLENISH_SECONDS),
            retry_after: Duration::from_secs(DEFAULT_RETRY_AFTER_SECONDS),
            idle_ttl: None,
            escalation: default_escalation(),
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Time needed to earn back one token.
    #[must_use]
    pub fn with_replenish(mut self, replenish: Duration) -> Self {
        self.replenish = replenish;
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Forget clients idle for longer than `ttl`. `None` keeps every entry.
    #[must_use]
    pub fn with_idle_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.idle_ttl = ttl.filter(|ttl| !ttl.is_zero());
        self
    }

    /// `(failures, block)` pairs; the highest threshold reached wins.
    #[must_use]
    pub fn with_escalation(mut self, mut escalation: Vec<(u32, Duration)>) -> Self {
        escalation.sort_by_key(|(threshold, _)| *threshold);
        self.escalation = escalation;
        self
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn idle_ttl(&self) -> Option<Duration> {
        self.idle_ttl
    }

    fn block_for(&self, failures: u32) -> Option<Duration> {
        self.escalation
            .iter()
            .rev()
            .find(|(threshold, _)| failures >= *threshold)
            .map(|(_, block)| *block)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Bucket empty; `retry_after` is the configured hint.
    RateLimited { retry_after: Duration },
    /// Inside a failure block; `retry_after` is what remains of it.
    Locked { retry_after: Duration },
}

impl Decision {
    /// Seconds for a `Retry-After` header, rounded up and never zero.
    #[must_use]
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::Allow => None,
            Self::RateLimited { retry_after } | Self::Locked { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    AuthFailure,
    Success,
    Other,
}

impl Outcome {
    /// Only `200 OK` (a completed login) clears the failure streak. Signup's
    /// `201 Created` is not an authentication and leaves it untouched.
    #[must_use]
    pub fn from_status(status: axum::http::StatusCode) -> Self {
        match status {
            axum::http::StatusCode::UNAUTHORIZED => Self::AuthFailure,
            axum::http::StatusCode::OK => Self::Success,
            _ => Self::Other,
        }
    }
}

#[derive(Debug)]
struct ClientState {
    tokens: f64,
    refilled_at: Instant,
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
    last_seen: Instant,
}

impl ClientState {
    fn new(burst: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst),
            refilled_at: now,
            consecutive_failures: 0,
            blocked_until: None,
            last_seen: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let burst = f64::from(config.burst);
        if config.replenish.is_zero() {
            self.tokens = burst;
        } else {
            let elapsed = now.saturating_duration_since(self.refilled_at);
            let earned = elapsed.as_secs_f64() / config.replenish.as_secs_f64();
            self.tokens = (self.tokens + earned).min(burst);
        }
        self.refilled_at = now;
    }

    fn remaining_block(&self, now: Instant) -> Option<Duration> {
        self.blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

#[derive(Debug)]
pub struct AdaptiveLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, Arc<Mutex<ClientState>>>,
}

impl AdaptiveLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of tracked client identities.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    fn client(&self, identity: &str, now: Instant) -> Arc<Mutex<ClientState>> {
        if let Some(existing) = self.clients.get(identity) {
            return existing.clone();
        }
        self.clients
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClientState::new(self.config.burst, now))))
            .clone()
    }

    pub fn admit(&self, identity: &str) -> Decision {
        self.admit_at(identity, Instant::now())
    }

    pub fn admit_at(&self, identity: &str, now: Instant) -> Decision {
        let client = self.client(identity, now);
        let mut state = client.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_seen = now;

        if let Some(retry_after) = state.remaining_block(now) {
            debug!(client = identity, "request rejected while blocked");
            return Decision::Locked { retry_after };
        }

        state.refill(&self.config, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Decision::Allow
        } else {
            warn!(client = identity, "rate limit exceeded");
            Decision::RateLimited {
                retry_after: self.config.retry_after,
            }
        }
    }

    pub fn observe(&self, identity: &str, outcome: Outcome) {
        self.observe_at(identity, outcome, Instant::now());
    }

    pub fn observe_at(&self, identity: &str, outcome: Outcome, now: Instant) {
        if outcome == Outcome::Other {
            return;
        }
        let client = self.client(identity, now);
        let mut state = client.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_seen = now;

        match outcome {
            Outcome::AuthFailure => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let failures = state.consecutive_failures;
                if let Some(block) = self.config.block_for(failures) {
                    let until = now + block;
                    state.blocked_until = Some(state.blocked_until.map_or(until, |b| b.max(until)));
                    warn!(
                        client = identity,
                        failures,
                        block_seconds = block.as_secs(),
                        "client blocked after repeated authentication failures"
                    );
                } else {
                    warn!(client = identity, failures, "authentication failure");
                }
            }
            Outcome::Success => {
                state.consecutive_failures = 0;
                state.blocked_until = None;
            }
            Outcome::Other => {}
        }
    }

    /// Drop clients idle beyond the configured TTL that are not inside a block.
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        let Some(ttl) = self.config.idle_ttl else {
            return 0;
        };
        let before = self.clients.len();
        self.clients.retain(|_, client| {
            let state = client.lock().unwrap_or_else(PoisonError::into_inner);
            state.remaining_block(now).is_some()
                || now.saturating_duration_since(state.last_seen) < ttl
        });
        before.saturating_sub(self.clients.len())
    }

    /// Run `sweep_idle` periodically when an idle TTL is configured.
    pub fn spawn_idle_sweep(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let ttl = self.config.idle_ttl?;
        let limiter = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = limiter.sweep_idle();
                if removed > 0 {
                    debug!(removed, "idle rate limit entries swept");
                }
            }
        }))
    }
}
