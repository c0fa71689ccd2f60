use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Rejection and session lifecycle counters
#[derive(Clone)]
pub struct Metrics {
    pub rate_limited: Arc<AtomicU64>,
    pub replay_rejected: Arc<AtomicU64>,
    pub csrf_rejected: Arc<AtomicU64>,
    pub sessions_created: Arc<AtomicU64>,
    pub sessions_expired: Arc<AtomicU64>,
    pub sessions_rotated: Arc<AtomicU64>,
    pub sessions_destroyed: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            rate_limited: Arc::new(AtomicU64::new(0)),
            replay_rejected: Arc::new(AtomicU64::new(0)),
            csrf_rejected: Arc::new(AtomicU64::new(0)),
            sessions_created: Arc::new(AtomicU64::new(0)),
            sessions_expired: Arc::new(AtomicU64::new(0)),
            sessions_rotated: Arc::new(AtomicU64::new(0)),
            sessions_destroyed: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replay_rejected(&self) {
        self.replay_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_csrf_rejected(&self) {
        self.csrf_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_expired(&self) {
        self.sessions_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_rotated(&self) {
        self.sessions_rotated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_destroyed(&self) {
        self.sessions_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            replay_rejected: self.replay_rejected.load(Ordering::Relaxed),
            csrf_rejected: self.csrf_rejected.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            sessions_rotated: self.sessions_rotated.load(Ordering::Relaxed),
            sessions_destroyed: self.sessions_destroyed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub rate_limited: u64,
    pub replay_rejected: u64,
    pub csrf_rejected: u64,
    pub sessions_created: u64,
    pub sessions_expired: u64,
    pub sessions_rotated: u64,
    pub sessions_destroyed: u64,
    pub uptime_seconds: u64,
}
