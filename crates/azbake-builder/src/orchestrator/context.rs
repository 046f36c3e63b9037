//! Typed state shared by the steps of one build

use super::disk::{DiskFlags, DiskPlan, DiskReference, resolve_disk_plan};
use super::report::CleanupReport;
use super::teardown::ForeignResources;
use crate::arm::{DeploymentHandle, ResourceDescriptor, ResourceGateway};
use crate::progress::Reporter;
use crate::retry::RetryExecutor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// State for one build, passed to every step
pub struct BuildContext {
    pub handle: DeploymentHandle,
    pub disk_flags: DiskFlags,
    pub foreign: ForeignResources,
    pub reporter: Arc<dyn Reporter>,
    /// Why the pipeline halted, if it did
    pub error: Option<String>,
    /// Filled in by cleanup
    pub report: Option<CleanupReport>,
    disk_plan: Option<DiskPlan>,
}

impl BuildContext {
    pub fn new(handle: DeploymentHandle, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            handle,
            disk_flags: DiskFlags::default(),
            foreign: ForeignResources::default(),
            reporter,
            error: None,
            report: None,
            disk_plan: None,
        }
    }

    pub fn with_disk_flags(mut self, flags: DiskFlags) -> Self {
        self.disk_flags = flags;
        self
    }

    pub fn with_foreign(mut self, foreign: ForeignResources) -> Self {
        self.foreign = foreign;
        self
    }

    /// Record that a capture step consumed the OS disk
    pub fn mark_os_disk_disposed(&mut self) {
        self.disk_flags.already_disposed = true;
        if let Some(plan) = &mut self.disk_plan {
            plan.flags.already_disposed = true;
        }
    }

    /// The build VM's disks, looked up on first access while the VM exists.
    ///
    /// VMs whose disks stay unknown after retries are listed in the plan's
    /// `unresolved`; teardown keeps them and the deployment for a later run.
    pub async fn disk_plan<G: ResourceGateway>(
        &mut self,
        gateway: &G,
        inventory: &[ResourceDescriptor],
        retry: &RetryExecutor,
        cancel: &CancellationToken,
    ) -> &DiskPlan {
        if self.disk_plan.is_none() {
            let plan = resolve_disk_plan(gateway, inventory, self.disk_flags, retry, cancel).await;
            for unresolved in &plan.unresolved {
                self.reporter.error(&format!(
                    "Could not determine the disks of VM '{}' ({}); \
                     check resource group '{}' for leftover disks",
                    unresolved.vm, unresolved.error, self.handle.resource_group
                ));
            }
            self.disk_plan = Some(plan);
        }
        self.disk_plan.get_or_insert_with(|| DiskPlan::empty(self.disk_flags))
    }

    /// The disk kept as the build's output, once cleanup has run
    pub fn artifact(&self) -> Option<&DiskReference> {
        self.report.as_ref().and_then(|r| r.artifact.as_ref())
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("handle", &self.handle)
            .field("disk_flags", &self.disk_flags)
            .field("foreign", &self.foreign)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
