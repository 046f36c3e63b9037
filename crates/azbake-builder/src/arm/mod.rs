//! Azure Resource Manager access
//!
//! This module provides:
//! - [`ResourceGateway`]: the typed operations the orchestrator needs
//! - [`ArmClient`]: the REST implementation over `reqwest`
//! - [`ArmError`]: error classification shared by both

pub mod client;
pub mod context;
pub mod error;
pub mod gateway;
pub mod resource_id;
pub mod types;

pub use client::ArmClient;
pub use context::ArmContext;
pub use error::{ArmError, classify_arm_error};
pub use gateway::ResourceGateway;
pub use resource_id::{BlobLocation, ManagedDiskId};
pub use types::{
    DataDisk, DeploymentHandle, DeploymentOperation, DeploymentRequest, DeploymentStatus,
    DiskSource, OperationsPage, ProvisioningState, ResourceDescriptor, StorageProfile,
    TargetResource,
};
