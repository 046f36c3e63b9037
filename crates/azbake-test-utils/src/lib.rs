//! Shared test utilities for azbake
//!
//! This crate provides common test helpers for the integration tests of
//! `azbake-builder` without a circular dev-dependency on the library's own
//! unit tests.
//!
//! ## Modules
//!
//! - [`gateway`]: scriptable in-memory [`ResourceGateway`](azbake_builder::arm::ResourceGateway)
//! - [`reporter`]: reporter that records every message
//! - [`fixtures`]: common handles, policies and deployments

pub mod fixtures;
pub mod gateway;
pub mod reporter;

// Re-export commonly used items
pub use fixtures::{fast_executor, fast_retry, init_tracing, test_handle};
pub use gateway::{Call, FakeGateway};
pub use reporter::RecordingReporter;
