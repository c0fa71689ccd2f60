//! HTTP route handlers and router assembly.
//!
//! - `chat`: the placeholder streaming chat endpoint
//! - `health`: liveness and metrics, outside the protection chain
//! - `session`: `/me`, `/logout`, the optional `/csrf` seed and the login/logout primitives

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::middleware::csrf::{ensure_csrf_cookie_middleware, require_csrf};
use crate::middleware::session::require_session;
use crate::middleware::MiddlewareChain;
use crate::state::AppState;

pub mod chat;
pub mod health;
pub mod session;

/// Body limit for application routes; chat messages are capped far below it.
const BODY_LIMIT: usize = 64 * 1024;

/// Application routes with their CSRF layers, before the protection chain.
pub fn app_router(state: &AppState) -> Router {
    let csrf = from_fn_with_state(state.clone(), require_csrf);

    // Later route layers wrap earlier ones: a missing session is reported before CSRF.
    let mut app = Router::<AppState>::new()
        .route("/me", get(session::me))
        .route("/api/chat", post(chat::chat).route_layer(csrf.clone()))
        .route(
            "/logout",
            post(session::logout_handler)
                .route_layer(csrf)
                .route_layer(from_fn_with_state(state.clone(), require_session)),
        );
    if state.config.security.csrf_seed_endpoint {
        app = app.route("/csrf", get(session::csrf_seed));
    }

    app.layer(from_fn_with_state(state.clone(), ensure_csrf_cookie_middleware))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state.clone())
}

/// The full service: health routes plus the application behind `chain`.
pub fn build_router(state: AppState, chain: &MiddlewareChain) -> Router {
    let guarded = chain.apply(app_router(&state), &state);

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .with_state(state)
        .merge(guarded)
}
