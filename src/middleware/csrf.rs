//! Cross-Site Request Forgery (CSRF) protection middleware.
//!
//! Double-submit cookie: the token lives in a script-readable `csrftoken`
//! cookie and every state-changing request must echo it in `X-CSRF-Token`.
//! Tokens are a keyed hash of the session's CSRF seed, so a token only
//! validates for the session it was issued to.

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

use super::cookies::{append_set_cookie, build_cookie, read_cookie, removal_cookie, sets_cookie, CookieOptions};
use super::ip::client_key;
use super::is_mutating;
use super::session::{current_session, sid_prefix, CurrentSession, Session, SessionDirective};
use crate::error::AppError;
use crate::state::AppState;

pub const CSRF_COOKIE_NAME: &str = "csrftoken";
pub const CSRF_HEADER: &str = "X-CSRF-Token";
const KEY_CONTEXT: &str = "chatwall 2024 csrf token key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CsrfRejection {
    #[error("CSRF token missing")]
    Missing,
    #[error("CSRF token mismatch")]
    Mismatch,
    #[error("CSRF token does not belong to this session")]
    NotBound,
}

impl CsrfRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            CsrfRejection::Missing => "missing",
            CsrfRejection::Mismatch => "mismatch",
            CsrfRejection::NotBound => "not_bound",
        }
    }
}

/// Issues and validates double-submit tokens.
#[derive(Clone)]
pub struct CsrfGuard {
    key: [u8; blake3::KEY_LEN],
}

impl CsrfGuard {
    pub fn new(key: [u8; blake3::KEY_LEN]) -> Self {
        Self { key }
    }

    /// Derives the key from a configured secret, or draws a random one so
    /// tokens do not survive a restart.
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) => Self::new(blake3::derive_key(KEY_CONTEXT, secret.as_bytes())),
            None => {
                let mut key = [0u8; blake3::KEY_LEN];
                OsRng.fill_bytes(&mut key);
                Self::new(key)
            }
        }
    }

    /// The token for `session`. Idempotent: the same session always yields the same token.
    pub fn ensure(&self, session: &Session) -> String {
        blake3::keyed_hash(&self.key, session.csrf_seed.as_bytes()).to_hex().to_string()
    }

    pub fn validate(&self, session: &Session, cookie: Option<&str>, header: Option<&str>) -> Result<(), CsrfRejection> {
        let (Some(cookie), Some(header)) = (cookie.filter(|c| !c.is_empty()), header.filter(|h| !h.is_empty()))
        else {
            return Err(CsrfRejection::Missing);
        };
        if !constant_time_eq(cookie, header) {
            return Err(CsrfRejection::Mismatch);
        }
        if !constant_time_eq(cookie, &self.ensure(session)) {
            return Err(CsrfRejection::NotBound);
        }
        Ok(())
    }

    /// True when `cookie` is the current token for `session`.
    pub fn is_current(&self, session: &Session, cookie: Option<&str>) -> bool {
        cookie.map(|c| constant_time_eq(c, &self.ensure(session))).unwrap_or(false)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

fn cookie_options(state: &AppState) -> CookieOptions {
    CookieOptions { http_only: false, secure: state.config.is_production(), max_age_secs: None }
}

/// Marks a response that must carry a fresh CSRF cookie even if the request had one.
#[derive(Debug, Clone, Copy)]
pub struct ForceCsrfCookie;

/// Issues the token for `session` as a cookie on `response`.
pub fn issue_csrf(state: &AppState, session: &Session, response: &mut Response) -> String {
    let token = state.csrf.ensure(session);
    append_set_cookie(response.headers_mut(), &build_cookie(CSRF_COOKIE_NAME, &token, cookie_options(state)));
    token
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Application-level layer that keeps the `csrftoken` cookie in step with the session.
///
/// Safe requests without a current token get one. Rotation always re-issues
/// for the new session and logout clears it.
pub async fn ensure_csrf_cookie_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let cookie = read_cookie(req.headers(), CSRF_COOKIE_NAME);
    let current = req.extensions().get::<CurrentSession>().cloned();

    let mut response = next.run(req).await;
    if sets_cookie(response.headers(), CSRF_COOKIE_NAME) {
        return response;
    }

    match response.extensions().get::<SessionDirective>().cloned() {
        Some(SessionDirective::Rotated(new_sid)) => {
            if let Some(session) = state.sessions.get(&new_sid).await {
                issue_csrf(&state, &session, &mut response);
            }
        }
        Some(SessionDirective::Destroyed) => {
            let cookie = removal_cookie(CSRF_COOKIE_NAME, false, state.config.is_production());
            append_set_cookie(response.headers_mut(), &cookie);
        }
        None => {
            let Some(current) = current else {
                return response;
            };
            let forced = response.extensions().get::<ForceCsrfCookie>().is_some();
            if forced || (is_safe(&method) && !state.csrf.is_current(&current.session, cookie.as_deref())) {
                issue_csrf(&state, &current.session, &mut response);
            }
        }
    }
    response
}

/// Enforces the double-submit check on mutating requests to protected routes.
///
/// # Returns
///
/// The response of the handler, or a `403 Forbidden` with the rejection
/// reason when the cookie and header are missing, differ or belong to another
/// session.
pub async fn require_csrf(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !is_mutating(req.method()) {
        return next.run(req).await;
    }

    let current = match current_session(req.extensions()) {
        Ok(current) => current,
        Err(e) => return e.into_response(),
    };
    let cookie = read_cookie(req.headers(), CSRF_COOKIE_NAME);
    let header = req.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok());

    match state.csrf.validate(&current.session, cookie.as_deref(), header) {
        Ok(()) => next.run(req).await,
        Err(rejection) => {
            tracing::info!(
                reason = rejection.reason(),
                ip = %client_key(&req, state.config.security.trust_proxy),
                sid = %sid_prefix(&current.sid),
                "csrf.reject"
            );
            state.metrics.inc_csrf_rejected();
            AppError::Csrf(rejection).into_response()
        }
    }
}
