use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use super::chain::{Stage, StageTrail};
use super::ip::{client_key, ClientKey};
use super::session::sid_prefix_from_headers;
use crate::clock::SharedClock;
use crate::error::AppError;
use crate::state::AppState;

/// Per-client bucket state. Refill happens lazily on access.
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Outcome of a single [`TokenBucketLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Allow,
    Deny {
        /// Seconds until one whole token is available again.
        retry_after: f64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow)
    }

    /// `Retry-After` value in whole seconds, never below one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            RateDecision::Allow => None,
            RateDecision::Deny { retry_after } => Some((retry_after.ceil() as u64).max(1)),
        }
    }
}

/// A thread-safe per-client token bucket limiter.
///
/// Each client gets `capacity` tokens up front and regains `refill_rate`
/// tokens per second, never more than `capacity`. A refill rate of zero
/// disables limiting entirely.
#[derive(Clone)]
pub struct TokenBucketLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, TokenBucket>>>,
    capacity: f64,
    refill_rate: f64,
    clock: SharedClock,
}

impl TokenBucketLimiter {
    /// Creates a limiter with burst capacity `2 × rps` and refill rate `rps`.
    pub fn new(rps: f64, clock: SharedClock) -> Self {
        Self::with_capacity(rps * 2.0, rps, clock)
    }

    pub fn with_capacity(capacity: f64, refill_rate: f64, clock: SharedClock) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(0.0),
            refill_rate: refill_rate.max(0.0),
            clock,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.refill_rate > 0.0
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refills the client's bucket and tries to take one token from it.
    pub async fn check(&self, key: &ClientKey) -> RateDecision {
        if !self.is_enabled() {
            return RateDecision::Allow;
        }

        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.clone())
            .or_insert(TokenBucket { tokens: self.capacity, last_refill: now });

        self.refill(bucket, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allow
        } else {
            RateDecision::Deny { retry_after: (1.0 - bucket.tokens) / self.refill_rate }
        }
    }

    /// Current token count for a client, after a lazy refill. `None` for unseen clients.
    pub async fn tokens(&self, key: &ClientKey) -> Option<f64> {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.get_mut(key)?;
        self.refill(bucket, now);
        Some(bucket.tokens)
    }

    /// Drops buckets that have refilled completely; an unseen client starts full anyway.
    pub async fn cleanup_idle(&self) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, b| b.tokens + elapsed_secs(b.last_refill, now) * self.refill_rate < self.capacity);
        before - buckets.len()
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }

    fn refill(&self, bucket: &mut TokenBucket, now: DateTime<Utc>) {
        let elapsed = elapsed_secs(bucket.last_refill, now);
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        // Clock went backwards: keep the later stamp so the gap is not refilled twice.
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }
    }
}

fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - since).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0).max(0.0)
}

/// First stage of the chain: sheds abusive traffic before any state lookups.
///
/// # Returns
///
/// * `Response` - The response from the next stage, or a `429 Too Many Requests`
///   response with a `Retry-After` header if the client's bucket is empty.
pub async fn rate_limit_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    StageTrail::record(&mut req, Stage::RateLimit);

    let client = client_key(&req, state.config.security.trust_proxy);
    let decision = state.limiter.check(&client).await;

    match decision.retry_after_seconds() {
        None => next.run(req).await,
        Some(retry_after_seconds) => {
            tracing::info!(
                ip = %client,
                sid = %sid_prefix_from_headers(req.headers()),
                retry_after_seconds,
                "rate_limit.reject"
            );
            state.metrics.inc_rate_limited();
            AppError::RateLimited { retry_after_seconds }.into_response()
        }
    }
}
