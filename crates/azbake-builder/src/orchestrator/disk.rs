//! Disk disposition
//!
//! Decides what happens to the build VM's OS and data disks once the VM is
//! gone: delete the managed disk, break the lease on and delete the VHD
//! blob, keep the OS disk as the build's artifact, or do nothing because an
//! earlier step already consumed it.

use super::report::{CleanupResult, Outcome};
use crate::arm::{
    ArmError, BlobLocation, DiskSource, ManagedDiskId, ResourceDescriptor, ResourceGateway,
    StorageProfile,
};
use crate::progress::Reporter;
use crate::retry::RetryExecutor;
use azbake_common::ResourceKind;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a disk lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskKind {
    /// Managed disk, by ARM resource id
    Managed { id: String },
    /// Unmanaged VHD page blob, by URI
    Blob { uri: String },
}

/// How the disk was attached to the build VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskRole {
    OsDisk,
    DataDisk(i32),
    /// Created by the deployment but not seen on the VM
    Unattached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskReference {
    pub kind: DiskKind,
    pub role: DiskRole,
}

impl DiskReference {
    pub fn from_source(source: &DiskSource, role: DiskRole) -> Self {
        let kind = match source {
            DiskSource::Managed(id) => DiskKind::Managed { id: id.clone() },
            DiskSource::Vhd(uri) => DiskKind::Blob { uri: uri.clone() },
        };
        Self { kind, role }
    }

    pub fn resource_kind(&self) -> ResourceKind {
        match self.kind {
            DiskKind::Managed { .. } => ResourceKind::ManagedDisk,
            DiskKind::Blob { .. } => ResourceKind::Blob,
        }
    }

    /// Short name used in reports: disk name or blob path
    pub fn name(&self) -> String {
        match &self.kind {
            DiskKind::Managed { id } => ManagedDiskId::parse(id)
                .map(|d| d.name)
                .unwrap_or_else(|_| id.clone()),
            DiskKind::Blob { uri } => BlobLocation::parse(uri)
                .map(|b| format!("{}/{}", b.container, b.blob))
                .unwrap_or_else(|_| uri.clone()),
        }
    }
}

impl fmt::Display for DiskReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiskKind::Managed { id } => write!(f, "{id}"),
            DiskKind::Blob { uri } => write!(f, "{uri}"),
        }
    }
}

/// Build-level switches that decide disk handling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskFlags {
    /// Build VM uses managed disks
    pub managed_build: bool,
    /// Build VM was created from a shared image catalog (always managed)
    pub catalog_sourced: bool,
    /// Leave the disks in place; the OS disk is the artifact
    pub keep_disk: bool,
    /// An upstream capture step consumed the OS disk
    pub already_disposed: bool,
}

impl DiskFlags {
    fn expects_managed(&self) -> bool {
        self.managed_build || self.catalog_sourced
    }
}

/// A VM whose storage profile could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDisks {
    pub vm: String,
    pub error: String,
}

impl UnresolvedDisks {
    /// Name used for the failed disk outcome
    pub fn label(&self) -> String {
        format!("{} os disk", self.vm)
    }
}

/// Disks to dispose of after the VM is deleted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskPlan {
    pub os_disk: Option<DiskReference>,
    pub data_disks: Vec<DiskReference>,
    pub flags: DiskFlags,
    /// VMs whose disks are unknown; they and the deployment must be kept
    pub unresolved: Vec<UnresolvedDisks>,
}

impl DiskPlan {
    pub fn empty(flags: DiskFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }

    pub fn from_storage_profile(profile: &StorageProfile, flags: DiskFlags) -> Self {
        let os_disk = profile
            .os_disk
            .as_ref()
            .map(|source| DiskReference::from_source(source, DiskRole::OsDisk));
        let data_disks = profile
            .data_disks
            .iter()
            .map(|d| DiskReference::from_source(&d.source, DiskRole::DataDisk(d.lun)))
            .collect();
        Self {
            os_disk,
            data_disks,
            flags,
            unresolved: Vec::new(),
        }
    }

    /// Kind of disk an unresolved VM most likely has
    pub fn expected_kind(&self) -> ResourceKind {
        if self.flags.expects_managed() {
            ResourceKind::ManagedDisk
        } else {
            ResourceKind::Blob
        }
    }

    /// Whether the disks of `vm` could not be looked up
    pub fn is_unresolved(&self, vm: &str) -> bool {
        self.unresolved.iter().any(|u| u.vm.eq_ignore_ascii_case(vm))
    }

    /// The disk reported as the build's output
    pub fn artifact(&self) -> Option<&DiskReference> {
        if self.flags.keep_disk {
            self.os_disk.as_ref()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.os_disk.is_none() && self.data_disks.is_empty()
    }

    fn references(&self, name: &str) -> bool {
        self.os_disk
            .iter()
            .chain(&self.data_disks)
            .any(|d| d.name().eq_ignore_ascii_case(name))
    }

    /// Add managed disks the deployment created that the VM no longer lists
    pub fn add_unattached(&mut self, subscription_id: &str, disks: &[ResourceDescriptor]) {
        for disk in disks {
            if disk.kind != ResourceKind::ManagedDisk || self.references(&disk.name) {
                continue;
            }
            let id = ManagedDiskId {
                subscription_id: subscription_id.to_string(),
                resource_group: disk.resource_group.clone(),
                name: disk.name.clone(),
            };
            self.data_disks.push(DiskReference {
                kind: DiskKind::Managed { id: id.path() },
                role: DiskRole::Unattached,
            });
        }
    }
}

/// Look up the disks of the build VM while it still exists.
///
/// Each lookup is retried under `retry`. A VM that is already gone
/// contributes nothing; one whose profile cannot be read is listed in
/// [`DiskPlan::unresolved`].
pub async fn resolve_disk_plan<G: ResourceGateway>(
    gateway: &G,
    inventory: &[ResourceDescriptor],
    flags: DiskFlags,
    retry: &RetryExecutor,
    cancel: &CancellationToken,
) -> DiskPlan {
    let mut plan = DiskPlan::empty(flags);
    for vm in inventory
        .iter()
        .filter(|r| r.kind == ResourceKind::VirtualMachine)
    {
        let label = format!("{vm} storage profile");
        let lookup = retry
            .fetch(&label, cancel, || {
                gateway.get_virtual_machine_storage(&vm.resource_group, &vm.name)
            })
            .await;
        match lookup {
            Ok(Some(profile)) => {
                let found = DiskPlan::from_storage_profile(&profile, flags);
                if plan.os_disk.is_none() {
                    plan.os_disk = found.os_disk;
                } else if let Some(os) = found.os_disk {
                    warn!(vm = %vm.name, disk = %os, "Second VM in deployment, treating its OS disk as a data disk");
                    plan.data_disks.push(os);
                }
                plan.data_disks.extend(found.data_disks);
            }
            Ok(None) => {
                debug!(vm = %vm.name, "VM already gone, no disks to look up");
            }
            Err(e) => {
                warn!(vm = %vm.name, error = %e, "Could not read VM storage profile");
                plan.unresolved.push(UnresolvedDisks {
                    vm: vm.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    plan
}

/// Applies the disk policy to a [`DiskPlan`]
pub struct DiskDisposer<G> {
    gateway: Arc<G>,
    retry: RetryExecutor,
    reporter: Arc<dyn Reporter>,
}

impl<G: ResourceGateway> DiskDisposer<G> {
    pub fn new(gateway: Arc<G>, retry: RetryExecutor, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            gateway,
            retry,
            reporter,
        }
    }

    /// Dispose of the OS disk, then each data disk independently.
    pub async fn dispose(&self, plan: &DiskPlan, cancel: &CancellationToken) -> Vec<Outcome> {
        let mut outcomes = Vec::new();

        if let Some(os) = &plan.os_disk {
            outcomes.push(self.dispose_one(os, &plan.flags, cancel).await);
        }
        for disk in &plan.data_disks {
            outcomes.push(self.dispose_one(disk, &plan.flags, cancel).await);
        }

        outcomes
    }

    async fn dispose_one(
        &self,
        disk: &DiskReference,
        flags: &DiskFlags,
        cancel: &CancellationToken,
    ) -> Outcome {
        let kind = disk.resource_kind();
        let name = disk.name();

        if flags.keep_disk {
            info!(disk = %disk, "Keeping disk");
            self.reporter.progress(&format!("Keeping disk {name}"));
            return Outcome::new(kind, name, CleanupResult::Kept);
        }
        if flags.already_disposed && disk.role == DiskRole::OsDisk {
            debug!(disk = %disk, "OS disk already consumed");
            return Outcome::new(kind, name, CleanupResult::Skipped);
        }
        if flags.expects_managed() && kind == ResourceKind::Blob {
            warn!(disk = %disk, "Managed build references a VHD blob, deleting the blob");
        }

        let label = format!("{kind} '{name}'");
        let attempt = match &disk.kind {
            DiskKind::Managed { id } => {
                let id = match ManagedDiskId::parse(id) {
                    Ok(id) => id,
                    Err(e) => return Outcome::failed(kind, name, e),
                };
                self.retry
                    .run(&label, cancel, || self.gateway.delete_managed_disk(&id))
                    .await
            }
            DiskKind::Blob { uri } => {
                let blob = match BlobLocation::parse(uri) {
                    Ok(blob) => blob,
                    Err(e) => return Outcome::failed(kind, name, e),
                };
                self.retry
                    .run(&label, cancel, || self.delete_blob(&blob))
                    .await
            }
        };

        Outcome::from_attempt(kind, name, attempt)
    }

    /// Break the lease (if any), then delete the blob
    async fn delete_blob(&self, blob: &BlobLocation) -> Result<(), ArmError> {
        match self.gateway.break_blob_lease(blob).await {
            Ok(()) => debug!(blob = %blob, "Lease broken"),
            Err(ArmError::LeaseNotPresent) => debug!(blob = %blob, "No lease held"),
            Err(e) => return Err(e),
        }
        self.gateway.delete_blob(blob).await
    }
}
