//! Middleware components for HTTP request processing.
//!
//! The protection chain (rate limit, anti-replay, session) lives here together
//! with the engines behind each stage and the CSRF layers the application
//! puts on its own routes.

use axum::http::Method;

pub mod anti_replay;
pub mod chain;
pub mod cookies;
pub mod csrf;
pub mod ip;
pub mod rate_limit;
pub mod session;

pub use anti_replay::NonceCache;
pub use chain::{MiddlewareChain, Stage};
pub use csrf::CsrfGuard;
pub use rate_limit::TokenBucketLimiter;
pub use session::SessionStore;

/// State-changing methods that need replay and CSRF protection.
pub fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}
