//! Server-side sessions with sliding expiration.
//!
//! The session cookie only carries an unguessable identifier; everything else
//! lives in [`SessionStore`]. A session stays alive as long as it is used at
//! least once per TTL, and every response re-issues the cookie so the browser
//! side slides along with it.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use super::chain::{Stage, StageTrail};
use super::cookies::{append_set_cookie, build_cookie, read_cookie, removal_cookie, CookieOptions};
use super::ip::client_key;
use crate::clock::SharedClock;
use crate::error::AppError;
use crate::expiry::{ExpireOnAccess, Stamped};
use crate::state::AppState;

pub const SESSION_COOKIE_NAME: &str = "sid";
const SID_BYTES: usize = 32;
const SEED_BYTES: usize = 32;
/// Longest identifier we bother looking up; ours are 43 characters.
const MAX_SID_LEN: usize = 128;

/// A server-side session record.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub data: HashMap<String, String>,
    #[serde(skip)]
    pub(crate) csrf_seed: String,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self { created_at: now, last_seen_at: now, data: HashMap::new(), csrf_seed: random_token(SEED_BYTES) }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

impl Stamped for Session {
    fn stamp(&self) -> DateTime<Utc> {
        self.last_seen_at
    }
}

/// How the session attached to a request came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// The cookie named a live session.
    Existing,
    /// No usable cookie; a fresh session was created.
    Created,
    /// The cookie named a session that had expired; it was dropped and replaced.
    Expired,
}

#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub sid: String,
    pub session: Session,
    pub origin: SessionOrigin,
}

/// Process-wide session map.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    policy: ExpireOnAccess,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(ttl_secs: u64, clock: SharedClock) -> Self {
        Self { sessions: Arc::new(Mutex::new(HashMap::new())), policy: ExpireOnAccess::from_secs(ttl_secs), clock }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.policy.window().num_seconds().max(0) as u64
    }

    /// Looks up the session named by the cookie, creating a new one when it is
    /// absent, unknown or expired. Expired records are deleted on the spot.
    pub async fn resolve(&self, sid: Option<&str>) -> ResolvedSession {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;

        let mut origin = SessionOrigin::Created;
        if let Some(sid) = sid.filter(|s| !s.is_empty() && s.len() <= MAX_SID_LEN) {
            if let Some(session) = sessions.get(sid) {
                if !self.policy.is_expired(session.stamp(), now) {
                    return ResolvedSession {
                        sid: sid.to_string(),
                        session: session.clone(),
                        origin: SessionOrigin::Existing,
                    };
                }
                sessions.remove(sid);
                origin = SessionOrigin::Expired;
            }
        }

        let (sid, session) = insert_new(&mut sessions, Session::new(now));
        ResolvedSession { sid, session, origin }
    }

    /// Creates an empty session.
    pub async fn create(&self) -> (String, Session) {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        insert_new(&mut sessions, Session::new(now))
    }

    /// Slides the expiry of a live session forward to now.
    pub async fn touch(&self, sid: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let session = self.policy.live_entry(&mut *sessions, sid, now)?;
        session.last_seen_at = now;
        Some(session.clone())
    }

    /// Returns a live session without touching it.
    pub async fn get(&self, sid: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        self.policy.live_entry(&mut *sessions, sid, now).map(|s| s.clone())
    }

    /// Moves a session to a fresh identifier to defeat fixation.
    ///
    /// Data and creation time carry over, the CSRF seed does not, and the old
    /// identifier stops resolving. An unknown or expired `old_sid` yields a new,
    /// empty session.
    pub async fn rotate(&self, old_sid: &str) -> (String, Session) {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;

        let mut session = Session::new(now);
        if let Some(existing) = sessions.remove(old_sid) {
            if !self.policy.is_expired(existing.stamp(), now) {
                session.created_at = existing.created_at;
                session.data = existing.data;
            }
        }
        insert_new(&mut sessions, session)
    }

    /// Removes a session. Returns whether it existed.
    pub async fn destroy(&self, sid: &str) -> bool {
        self.sessions.lock().await.remove(sid).is_some()
    }

    /// Stores `key = value` on a live session.
    pub async fn set_value(&self, sid: &str, key: &str, value: &str) -> bool {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        match self.policy.live_entry(&mut *sessions, sid, now) {
            Some(session) => {
                session.data.insert(key.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    /// Deletes every expired session and returns how many went.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        self.policy.sweep(&mut *sessions, now)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn insert_new(sessions: &mut HashMap<String, Session>, session: Session) -> (String, Session) {
    loop {
        let sid = random_token(SID_BYTES);
        if !sessions.contains_key(&sid) {
            sessions.insert(sid.clone(), session.clone());
            return (sid, session);
        }
    }
}

/// URL-safe random string backed by the operating system CSPRNG.
pub(crate) fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// First eight characters of a session id; the most that may appear in logs.
pub fn sid_prefix(sid: &str) -> String {
    sid.chars().take(8).collect()
}

pub fn sid_prefix_from_headers(headers: &HeaderMap) -> String {
    read_cookie(headers, SESSION_COOKIE_NAME).map(|sid| sid_prefix(&sid)).unwrap_or_default()
}

/// The session attached to the current request by [`session_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub sid: String,
    pub session: Session,
    pub origin: SessionOrigin,
}

impl CurrentSession {
    pub fn is_new(&self) -> bool {
        self.origin != SessionOrigin::Existing
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.get("user_id")
    }
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        current_session(&parts.extensions)
    }
}

/// Reads the session the middleware attached to a request.
pub fn current_session(extensions: &axum::http::Extensions) -> Result<CurrentSession, AppError> {
    extensions
        .get::<CurrentSession>()
        .cloned()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("route is not wrapped by the session middleware")))
}

/// Lifecycle change requested by a handler, carried in the response extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionDirective {
    /// The session moved to this identifier (login).
    Rotated(String),
    /// The session was removed (logout).
    Destroyed,
}

pub(crate) fn cookie_options(state: &AppState) -> CookieOptions {
    CookieOptions {
        http_only: true,
        secure: state.config.is_production(),
        max_age_secs: Some(state.sessions.ttl_secs()),
    }
}

/// Third stage of the chain: resolves and touches the session, then writes
/// the (re-issued, rotated or cleared) session cookie onto the response.
pub async fn session_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    StageTrail::record(&mut req, Stage::Session);

    let cookie_sid = read_cookie(req.headers(), SESSION_COOKIE_NAME);
    let resolved = state.sessions.resolve(cookie_sid.as_deref()).await;

    match resolved.origin {
        SessionOrigin::Existing => {}
        SessionOrigin::Created => state.metrics.inc_sessions_created(),
        SessionOrigin::Expired => {
            tracing::debug!(sid = %sid_prefix(cookie_sid.as_deref().unwrap_or_default()), "session.expired");
            state.metrics.inc_sessions_expired();
            state.metrics.inc_sessions_created();
        }
    }

    // A fresh record is already stamped with now; only existing ones slide.
    let session = match resolved.origin {
        SessionOrigin::Existing => state.sessions.touch(&resolved.sid).await.unwrap_or(resolved.session),
        _ => resolved.session,
    };

    req.extensions_mut().insert(CurrentSession {
        sid: resolved.sid.clone(),
        session,
        origin: resolved.origin,
    });

    let mut response = next.run(req).await;

    let opts = cookie_options(&state);
    let cookie = match response.extensions().get::<SessionDirective>() {
        Some(SessionDirective::Rotated(new_sid)) => build_cookie(SESSION_COOKIE_NAME, new_sid, opts),
        Some(SessionDirective::Destroyed) => removal_cookie(SESSION_COOKIE_NAME, true, opts.secure),
        None => build_cookie(SESSION_COOKIE_NAME, &resolved.sid, opts),
    };
    append_set_cookie(response.headers_mut(), &cookie);
    response
}

/// Route policy: reject instead of creating a session on demand.
pub async fn require_session(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let established = req.extensions().get::<CurrentSession>().map(|s| !s.is_new()).unwrap_or(false);
    if established {
        return next.run(req).await;
    }
    tracing::info!(
        ip = %client_key(&req, state.config.security.trust_proxy),
        sid = %sid_prefix_from_headers(req.headers()),
        "session.required"
    );
    AppError::SessionRequired.into_response()
}
