//! Replay protection for state-changing requests.
//!
//! Clients send a fresh `X-Nonce` and their unix time in `X-TS` with every
//! mutating request. A request is refused when the timestamp is outside the
//! freshness window or the nonce was already used inside it.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use super::chain::{Stage, StageTrail};
use super::ip::{client_key, ClientKey};
use super::is_mutating;
use super::session::sid_prefix_from_headers;
use crate::clock::SharedClock;
use crate::error::AppError;
use crate::expiry::ExpireOnAccess;
use crate::state::AppState;

pub const NONCE_HEADER: &str = "X-Nonce";
pub const TIMESTAMP_HEADER: &str = "X-TS";

/// Which clients share a nonce namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NonceScope {
    /// Nonces are remembered per client key.
    #[default]
    PerClient,
    /// One namespace for every client; a nonce used by anyone is burned for all.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReplayRejection {
    #[error("nonce or timestamp header missing")]
    MissingHeaders,
    #[error("timestamp is not an integer")]
    InvalidTimestamp,
    #[error("timestamp outside the freshness window")]
    StaleTimestamp,
    #[error("nonce already used")]
    Replay,
}

impl ReplayRejection {
    /// Stable identifier used in logs and error bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            ReplayRejection::MissingHeaders => "missing_headers",
            ReplayRejection::InvalidTimestamp => "invalid_ts",
            ReplayRejection::StaleTimestamp => "stale_ts",
            ReplayRejection::Replay => "nonce_reuse",
        }
    }
}

/// Recently seen nonces, keyed by `(scope, nonce)` and stamped with first sight.
#[derive(Clone)]
pub struct NonceCache {
    seen: Arc<Mutex<HashMap<(String, String), DateTime<Utc>>>>,
    policy: ExpireOnAccess,
    scope: NonceScope,
    clock: SharedClock,
}

impl NonceCache {
    pub fn new(freshness_window_secs: u64, scope: NonceScope, clock: SharedClock) -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashMap::new())),
            policy: ExpireOnAccess::from_secs(freshness_window_secs),
            scope,
            clock,
        }
    }

    pub fn scope(&self) -> NonceScope {
        self.scope
    }

    /// Accepts `nonce` at most once per freshness window and records it.
    ///
    /// The timestamp check runs first, so a stale request never occupies a slot.
    pub async fn check(&self, nonce: &str, claimed_ts: i64, client: &ClientKey) -> Result<(), ReplayRejection> {
        let now = self.clock.now();
        let skew = now.timestamp().abs_diff(claimed_ts);
        if skew > self.policy.window().num_seconds().unsigned_abs() {
            return Err(ReplayRejection::StaleTimestamp);
        }

        let key = (self.scope_key(client), nonce.to_string());
        let mut seen = self.seen.lock().await;
        if self.policy.live_entry(&mut *seen, &key, now).is_some() {
            return Err(ReplayRejection::Replay);
        }
        // A future-dated request stays fresh past `now + window`; keep its nonce that long too.
        let stamp = DateTime::<Utc>::from_timestamp(claimed_ts, 0).map_or(now, |claimed| claimed.max(now));
        seen.insert(key, stamp);
        Ok(())
    }

    /// Removes nonces older than the freshness window.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut seen = self.seen.lock().await;
        self.policy.sweep(&mut *seen, now)
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    fn scope_key(&self, client: &ClientKey) -> String {
        match self.scope {
            NonceScope::PerClient => client.as_str().to_string(),
            NonceScope::Global => String::new(),
        }
    }
}

/// Reads and parses the replay headers.
pub fn replay_headers(headers: &HeaderMap) -> Result<(String, i64), ReplayRejection> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let (Some(ts), Some(nonce)) = (header(TIMESTAMP_HEADER), header(NONCE_HEADER)) else {
        return Err(ReplayRejection::MissingHeaders);
    };
    let ts = ts.parse::<i64>().map_err(|_| ReplayRejection::InvalidTimestamp)?;
    Ok((nonce.to_string(), ts))
}

/// Second stage of the chain. Runs before sessions are materialised so a
/// replayed request cannot create sessions or extend their TTL.
pub async fn anti_replay_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    StageTrail::record(&mut req, Stage::AntiReplay);

    if !is_mutating(req.method()) {
        return next.run(req).await;
    }

    let client = client_key(&req, state.config.security.trust_proxy);
    let verdict = match replay_headers(req.headers()) {
        Ok((nonce, ts)) => state.nonces.check(&nonce, ts, &client).await,
        Err(rejection) => Err(rejection),
    };

    match verdict {
        Ok(()) => next.run(req).await,
        Err(rejection) => {
            tracing::info!(
                reason = rejection.reason(),
                ip = %client,
                sid = %sid_prefix_from_headers(req.headers()),
                "anti_replay.reject"
            );
            state.metrics.inc_replay_rejected();
            AppError::Replay(rejection).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use axum::http::HeaderValue;

    fn cache(scope: NonceScope) -> (NonceCache, ManualClock) {
        let clock = ManualClock::starting_now();
        (NonceCache::new(300, scope, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn repeated_nonce_is_a_replay() {
        let (cache, clock) = cache(NonceScope::PerClient);
        let client = ClientKey::from("127.0.0.1");
        let now = clock.now().timestamp();

        assert_eq!(cache.check("n1", now, &client).await, Ok(()));
        assert_eq!(cache.check("n1", now, &client).await, Err(ReplayRejection::Replay));
        assert_eq!(cache.check("n2", now, &client).await, Ok(()));
    }

    #[tokio::test]
    async fn stale_and_future_timestamps_are_rejected() {
        let (cache, clock) = cache(NonceScope::PerClient);
        let client = ClientKey::from("127.0.0.1");
        let now = clock.now().timestamp();

        assert_eq!(cache.check("past", now - 301, &client).await, Err(ReplayRejection::StaleTimestamp));
        assert_eq!(cache.check("future", now + 301, &client).await, Err(ReplayRejection::StaleTimestamp));
        assert_eq!(cache.check("edge", now - 300, &client).await, Ok(()));
        // Rejected requests do not occupy the cache.
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn nonce_is_forgotten_after_the_window() {
        let (cache, clock) = cache(NonceScope::PerClient);
        let client = ClientKey::from("127.0.0.1");

        cache.check("n1", clock.now().timestamp(), &client).await.unwrap();
        clock.advance_secs(200);
        assert_eq!(cache.check("n1", clock.now().timestamp(), &client).await, Err(ReplayRejection::Replay));

        clock.advance_secs(101);
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.check("n1", clock.now().timestamp(), &client).await, Ok(()));
    }

    #[tokio::test]
    async fn future_dated_nonce_is_kept_while_its_timestamp_is_fresh() {
        let (cache, clock) = cache(NonceScope::PerClient);
        let client = ClientKey::from("127.0.0.1");
        let claimed = clock.now().timestamp() + 300;

        assert_eq!(cache.check("n1", claimed, &client).await, Ok(()));
        clock.advance_secs(301);
        assert_eq!(cache.purge_expired().await, 0);
        assert_eq!(cache.check("n1", claimed, &client).await, Err(ReplayRejection::Replay));

        // Once the claimed timestamp itself is stale the request cannot pass anyway.
        clock.advance_secs(300);
        assert_eq!(cache.check("n1", claimed, &client).await, Err(ReplayRejection::StaleTimestamp));
        assert_eq!(cache.purge_expired().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_accept_a_nonce_once() {
        let (cache, clock) = cache(NonceScope::Global);
        let now = clock.now().timestamp();

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let client = ClientKey::from(format!("10.0.0.{}", i % 8).as_str());
                    cache.check("once", now, &client).await
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn per_client_scope_isolates_clients() {
        let (cache, clock) = cache(NonceScope::PerClient);
        let now = clock.now().timestamp();
        let a = ClientKey::from("10.0.0.1");
        let b = ClientKey::from("10.0.0.2");

        assert!(cache.check("shared", now, &a).await.is_ok());
        assert!(cache.check("shared", now, &b).await.is_ok());
    }

    #[tokio::test]
    async fn global_scope_burns_nonce_for_everyone() {
        let (cache, clock) = cache(NonceScope::Global);
        let now = clock.now().timestamp();
        let a = ClientKey::from("10.0.0.1");
        let b = ClientKey::from("10.0.0.2");

        assert!(cache.check("shared", now, &a).await.is_ok());
        assert_eq!(cache.check("shared", now, &b).await, Err(ReplayRejection::Replay));
    }

    #[test]
    fn header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(replay_headers(&headers), Err(ReplayRejection::MissingHeaders));

        headers.insert(NONCE_HEADER, HeaderValue::from_static("abc"));
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("yesterday"));
        assert_eq!(replay_headers(&headers), Err(ReplayRejection::InvalidTimestamp));

        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("1700000000"));
        assert_eq!(replay_headers(&headers), Ok(("abc".to_string(), 1_700_000_000)));
    }
}
