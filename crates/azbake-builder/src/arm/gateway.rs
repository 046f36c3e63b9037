//! Resource gateway trait
//!
//! Abstracts ARM operations so the orchestration logic can be exercised
//! against an in-memory gateway in tests. Every delete polls its long-running
//! operation to completion before returning.

use super::error::ArmError;
use super::resource_id::{BlobLocation, ManagedDiskId};
use super::types::{DeploymentHandle, DeploymentRequest, DeploymentStatus, OperationsPage, StorageProfile};
use std::future::Future;

/// Typed operations against Azure, one method per resource kind.
pub trait ResourceGateway: Send + Sync {
    /// Submit a template deployment (returns once ARM accepted it)
    fn create_deployment(
        &self,
        handle: &DeploymentHandle,
        request: &DeploymentRequest,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    /// Read the deployment's provisioning state
    fn get_deployment(
        &self,
        handle: &DeploymentHandle,
    ) -> impl Future<Output = Result<DeploymentStatus, ArmError>> + Send;

    /// Read one page of the deployment's operation log.
    ///
    /// `next_link` is `None` for the first page.
    fn list_deployment_operations(
        &self,
        handle: &DeploymentHandle,
        next_link: Option<&str>,
    ) -> impl Future<Output = Result<OperationsPage, ArmError>> + Send;

    /// Delete the deployment object
    fn delete_deployment(
        &self,
        handle: &DeploymentHandle,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    /// Read the VM's storage profile (OS disk and data disks)
    fn get_virtual_machine_storage(
        &self,
        resource_group: &str,
        name: &str,
    ) -> impl Future<Output = Result<StorageProfile, ArmError>> + Send;

    fn delete_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    fn delete_network_interface(
        &self,
        resource_group: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    fn delete_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    fn delete_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    fn delete_public_ip_address(
        &self,
        resource_group: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    fn delete_key_vault(
        &self,
        resource_group: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    fn delete_managed_disk(
        &self,
        disk: &ManagedDiskId,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    /// Break any lease held on the blob.
    ///
    /// Fails with [`ArmError::LeaseNotPresent`] when the blob holds no lease.
    fn break_blob_lease(
        &self,
        blob: &BlobLocation,
    ) -> impl Future<Output = Result<(), ArmError>> + Send;

    fn delete_blob(&self, blob: &BlobLocation) -> impl Future<Output = Result<(), ArmError>> + Send;
}
