use std::sync::Arc;

use crate::clock::{SharedClock, SystemClock};
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::middleware::{CsrfGuard, NonceCache, SessionStore, TokenBucketLimiter};

/// The shared application state.
///
/// Owns every piece of process-wide mutable state: token buckets, seen
/// nonces and sessions (the CSRF binding lives on each session). Handlers and
/// middleware receive it through Axum's `State` extractor instead of reaching
/// for globals, so each test can build a fresh one.
///
/// The state is local to this process. Running several workers or replicas
/// gives each its own buckets, nonces and sessions, which silently weakens all
/// three protections; scaling out needs these maps moved to a shared store.
#[derive(Clone)]
pub struct AppState {
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// Time source for every TTL and freshness decision.
    pub clock: SharedClock,
    pub limiter: TokenBucketLimiter,
    pub nonces: NonceCache,
    pub sessions: SessionStore,
    pub csrf: CsrfGuard,
    pub metrics: Metrics,
}

impl AppState {
    /// Creates a new `AppState` on the wall clock.
    pub fn new(config: AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a new `AppState` reading time from `clock`.
    pub fn with_clock(config: AppConfig, clock: SharedClock) -> Self {
        let sec = &config.security;
        let limiter = TokenBucketLimiter::new(sec.rate_limit_rps, clock.clone());
        let nonces = NonceCache::new(sec.freshness_window, sec.nonce_scope, clock.clone());
        let sessions = SessionStore::new(sec.session_ttl, clock.clone());
        let csrf = CsrfGuard::from_secret(sec.csrf_secret.as_deref());

        Self { config: Arc::new(config), clock, limiter, nonces, sessions, csrf, metrics: Metrics::new() }
    }
}
