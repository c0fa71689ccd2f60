//! # Chatwall Backend Library
//!
//! Request hardening for a small streaming chat API. Every request passes a
//! fixed chain of protections before it reaches a handler:
//!
//! 1. **Rate limit**: per-client token bucket (`429`)
//! 2. **Anti-replay**: nonce + timestamp freshness on mutating requests (`401`)
//! 3. **Session**: server-side sessions with sliding expiry
//!
//! Mutating application routes additionally enforce a double-submit CSRF token
//! bound to the session (`403`).
//!
//! ## Architecture
//!
//! - **Axum**: HTTP server, routing and `from_fn` middleware
//! - **Tokio**: async runtime; shared maps sit behind `tokio::sync::Mutex`
//! - **config** + **dotenvy**: layered configuration
//! - **tracing**: structured logs of every rejection (never full tokens or sids)
//!
//! ## Core Components
//!
//! - [`clock`]: injectable time source
//! - [`config`]: configuration loading and validation
//! - [`error`]: error type and JSON error responses
//! - [`expiry`]: the expire-on-access policy shared by nonces and sessions
//! - [`metrics`]: rejection and session counters
//! - [`middleware`]: the chain, its engines and the CSRF layers
//! - [`routes`]: handlers and router assembly
//! - [`state`]: the shared state container
//! - [`sweeper`]: background cleanup
//!
//! ## Deployment constraint
//!
//! All state is in process memory. Run a single worker process, or move the
//! buckets, nonces and sessions to a shared store before scaling out;
//! independent workers each enforce their own limits and know nothing of each
//! other's nonces or sessions.

pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod types;

#[cfg(test)]
mod tests;
