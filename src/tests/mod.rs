//! Integration and unit tests for the Chatwall application.
//!
//! ## Test Modules
//!
//! - **api_tests**: the protection chain end to end, through the full router
//! - **error_tests**: error responses and status mapping
//! - **config_tests**: configuration layering and validation
//! - **health_api_tests**: health and metrics endpoints
//!
//! Time-dependent behaviour is driven by `ManualClock`, so nothing here sleeps.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! cargo test api_tests
//! ```

pub mod error_tests;
