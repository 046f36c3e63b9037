//! azbake-builder - ARM template deployment and teardown
//!
//! Deploys the template that provisions a build VM, then deletes everything
//! the deployment created in dependency order once the build is done.

pub mod arm;
pub mod config;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod wait;
