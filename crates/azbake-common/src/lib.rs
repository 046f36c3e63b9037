//! azbake-common - Shared types and defaults
//!
//! Types shared by the builder and its test utilities, kept free of HTTP
//! and runtime dependencies.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`resource_kind`]: Azure resource kinds and their deletion phases

pub mod defaults;
pub mod resource_kind;

pub use resource_kind::{DeletionPhase, ResourceKind};
