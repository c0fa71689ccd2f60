//! Session-facing routes and the lifecycle primitives other handlers build on.
//!
//! `login` and `logout` only change server-side state; the cookies follow from
//! the [`SessionDirective`] the handler puts on its response.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::middleware::csrf::ForceCsrfCookie;
use crate::middleware::session::{sid_prefix, CurrentSession, SessionDirective};
use crate::state::AppState;
use crate::types::MeResponse;

pub const USER_ID_KEY: &str = "user_id";

/// Rotates the caller's session to a fresh identifier and records `user_id` on it.
///
/// Call this after the credentials were verified elsewhere and return the
/// directive in the response extensions.
pub async fn login(state: &AppState, current: &CurrentSession, user_id: &str) -> SessionDirective {
    let (new_sid, _) = state.sessions.rotate(&current.sid).await;
    state.sessions.set_value(&new_sid, USER_ID_KEY, user_id).await;
    state.metrics.inc_sessions_rotated();
    tracing::info!(from = %sid_prefix(&current.sid), to = %sid_prefix(&new_sid), "session.rotated");
    SessionDirective::Rotated(new_sid)
}

/// Removes the caller's session.
pub async fn logout(state: &AppState, current: &CurrentSession) -> SessionDirective {
    if state.sessions.destroy(&current.sid).await {
        state.metrics.inc_sessions_destroyed();
    }
    tracing::info!(sid = %sid_prefix(&current.sid), "session.destroyed");
    SessionDirective::Destroyed
}

/// Attaches a lifecycle directive to an otherwise empty response.
pub fn with_directive(status: StatusCode, directive: SessionDirective) -> Response {
    let mut response = status.into_response();
    response.extensions_mut().insert(directive);
    response
}

/// `GET /me`
pub async fn me(current: CurrentSession) -> Json<MeResponse> {
    Json(MeResponse::for_user(current.user_id()))
}

/// `POST /logout`
pub async fn logout_handler(State(state): State<AppState>, current: CurrentSession) -> Response {
    let directive = logout(&state, &current).await;
    with_directive(StatusCode::NO_CONTENT, directive)
}

/// `GET /csrf`, only mounted when `security.csrf_seed_endpoint` is on. The
/// token travels in the cookie only, never in the body.
pub async fn csrf_seed() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    response.extensions_mut().insert(ForceCsrfCookie);
    response
}
