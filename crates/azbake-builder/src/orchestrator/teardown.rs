//! Dependency-ordered teardown of a deployment's resources
//!
//! Deletion order:
//! 1. Virtual machines, one at a time
//! 2. Network interfaces, one at a time (Azure refuses while a VM holds them)
//! 3. Everything else concurrently, joined before moving on
//! 4. Disks, per the disk policy
//! 5. Nested deployments, then the build's deployment
//!
//! A VM whose disks could not be looked up is kept, and so is the
//! deployment, so that a later `azbake cleanup` can pick both up again.

use super::deleters::DeleterTable;
use super::disk::{DiskDisposer, DiskPlan};
use super::report::{CleanupReport, CleanupResult, Outcome};
use crate::arm::{DeploymentHandle, ResourceDescriptor, ResourceGateway};
use crate::progress::Reporter;
use crate::retry::RetryExecutor;
use azbake_common::{DeletionPhase, ResourceKind};
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Pre-existing resources the build references but must never delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignResources {
    pub security_group: Option<String>,
    pub virtual_network: Option<String>,
    pub key_vault: Option<String>,
}

impl ForeignResources {
    /// Check if `resource` is one of the caller's own resources
    pub fn contains(&self, resource: &ResourceDescriptor) -> bool {
        let reference = match resource.kind {
            ResourceKind::NetworkSecurityGroup => &self.security_group,
            ResourceKind::VirtualNetwork => &self.virtual_network,
            ResourceKind::KeyVault => &self.key_vault,
            _ => return false,
        };
        reference
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(&resource.name))
    }
}

/// Inventory partitioned into deletion phases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownPlan {
    pub compute: Vec<ResourceDescriptor>,
    pub network_interfaces: Vec<ResourceDescriptor>,
    pub independent: Vec<ResourceDescriptor>,
    /// Managed disks found in the inventory, merged into the disk plan
    pub disks: Vec<ResourceDescriptor>,
    pub nested_deployments: Vec<ResourceDescriptor>,
    /// Excluded from deletion
    pub foreign: Vec<ResourceDescriptor>,
}

impl TeardownPlan {
    pub fn build(inventory: Vec<ResourceDescriptor>, foreign: &ForeignResources) -> Self {
        let mut plan = Self::default();
        for resource in inventory {
            if foreign.contains(&resource) {
                plan.foreign.push(resource);
                continue;
            }
            let phase = match resource.kind.deletion_phase() {
                DeletionPhase::Compute => &mut plan.compute,
                DeletionPhase::NetworkInterface => &mut plan.network_interfaces,
                DeletionPhase::Independent => &mut plan.independent,
                DeletionPhase::Disk => &mut plan.disks,
                DeletionPhase::Deployment => &mut plan.nested_deployments,
            };
            phase.push(resource);
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.compute.is_empty()
            && self.network_interfaces.is_empty()
            && self.independent.is_empty()
            && self.disks.is_empty()
            && self.nested_deployments.is_empty()
    }

    /// Lines describing the planned phases, for dry runs
    pub fn describe(&self) -> Vec<String> {
        let phases: [(&str, &[ResourceDescriptor]); 6] = [
            ("1. compute (sequential)", &self.compute),
            ("2. network interfaces (sequential)", &self.network_interfaces),
            ("3. independent (concurrent)", &self.independent),
            ("4. disks", &self.disks),
            ("5. nested deployments", &self.nested_deployments),
            ("not owned, kept", &self.foreign),
        ];
        let mut lines = Vec::new();
        for (title, resources) in phases {
            if resources.is_empty() {
                continue;
            }
            lines.push(title.to_string());
            lines.extend(resources.iter().map(|r| format!("  {r}")));
        }
        lines
    }
}

/// Deletes a deployment's resources in dependency order
pub struct TeardownCoordinator<G> {
    gateway: Arc<G>,
    retry: RetryExecutor,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
}

impl<G: ResourceGateway + 'static> TeardownCoordinator<G> {
    pub fn new(gateway: Arc<G>, retry: RetryExecutor, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            gateway,
            retry,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort outstanding deletions when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tear down everything `handle` created.
    ///
    /// Never fails: every per-resource failure ends up in the report.
    pub async fn teardown(
        &self,
        handle: &DeploymentHandle,
        inventory: Vec<ResourceDescriptor>,
        foreign: &ForeignResources,
        disks: &DiskPlan,
    ) -> CleanupReport {
        let mut report = CleanupReport::new(handle.to_string());
        let plan = TeardownPlan::build(inventory, foreign);
        let deleters = DeleterTable::<G>::standard(&handle.subscription_id);

        info!(
            deployment = %handle,
            compute = plan.compute.len(),
            network_interfaces = plan.network_interfaces.len(),
            independent = plan.independent.len(),
            foreign = plan.foreign.len(),
            "Starting teardown"
        );

        for resource in &plan.foreign {
            info!(resource = %resource, "Not owned by this build, keeping");
            self.reporter
                .progress(&format!("Keeping {resource}: not owned by this build"));
            report.push(Outcome::new(resource.kind, &resource.name, CleanupResult::Skipped));
        }

        // Sequential gates: a NIC cannot go while a VM holds it
        for resource in plan.compute.iter().chain(&plan.network_interfaces) {
            let disks_unknown =
                resource.kind == ResourceKind::VirtualMachine && disks.is_unresolved(&resource.name);
            if disks_unknown {
                warn!(resource = %resource, "Disks unknown, keeping VM");
                self.reporter.error(&format!(
                    "Keeping {resource}: its disks are unknown and would be left behind"
                ));
                report.push(Outcome {
                    error: Some("kept, disks unknown".into()),
                    ..Outcome::new(resource.kind, &resource.name, CleanupResult::Skipped)
                });
                continue;
            }
            report.push(self.delete_one(&deleters, resource).await);
        }

        let fanned_out = join_all(
            plan.independent
                .iter()
                .map(|resource| self.delete_one(&deleters, resource)),
        )
        .await;
        report.outcomes.extend(fanned_out);

        let mut disks = disks.clone();
        disks.add_unattached(&handle.subscription_id, &plan.disks);
        let disposer = DiskDisposer::new(
            Arc::clone(&self.gateway),
            self.retry.clone(),
            Arc::clone(&self.reporter),
        );
        report
            .outcomes
            .extend(disposer.dispose(&disks, &self.cancel).await);
        report.artifact = disks.artifact().cloned();
        for unresolved in &disks.unresolved {
            report.push(Outcome::failed(
                disks.expected_kind(),
                unresolved.label(),
                &unresolved.error,
            ));
        }

        for resource in &plan.nested_deployments {
            report.push(self.delete_one(&deleters, resource).await);
        }

        if disks.unresolved.is_empty() {
            let label = format!("deployment '{}'", handle.deployment_name);
            let attempt = self
                .retry
                .run(&label, &self.cancel, || self.gateway.delete_deployment(handle))
                .await;
            let outcome =
                Outcome::from_attempt(ResourceKind::Deployment, &handle.deployment_name, attempt);
            if !outcome.succeeded() {
                warn!(deployment = %handle, error = ?outcome.error, "Failed to delete deployment");
            }
            report.push(outcome);
        } else {
            // Its operation log is the only way a later run can find the kept VM
            warn!(deployment = %handle, "Disk set unknown, keeping deployment");
            self.reporter.error(&format!(
                "Keeping deployment {handle}; run `azbake cleanup` again to finish"
            ));
            let kept = Outcome::new(
                ResourceKind::Deployment,
                &handle.deployment_name,
                CleanupResult::Skipped,
            );
            report.push(Outcome {
                error: Some("kept, disks unknown".into()),
                ..kept
            });
        }

        report.finish();
        let failed = report.count(CleanupResult::Failed);
        if failed > 0 {
            warn!(deployment = %handle, failed, "Teardown finished with failures");
            self.reporter.error(&format!(
                "{failed} resource(s) of deployment {handle} could not be deleted"
            ));
        } else {
            info!(deployment = %handle, "Teardown complete");
            self.reporter.progress("Cleanup complete");
        }
        report
    }

    async fn delete_one(&self, deleters: &DeleterTable<G>, resource: &ResourceDescriptor) -> Outcome {
        let Some(deleter) = deleters.get(resource.kind) else {
            warn!(resource = %resource, "No deletion strategy registered");
            return Outcome::failed(
                resource.kind,
                &resource.name,
                format!("no deletion strategy for {}", resource.kind),
            );
        };

        let attempt = self
            .retry
            .run(&resource.to_string(), &self.cancel, || {
                deleter.delete(&self.gateway, resource)
            })
            .await;
        Outcome::from_attempt(resource.kind, &resource.name, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: ResourceKind, name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(kind, name, "rg")
    }

    #[test]
    fn plan_partitions_by_phase() {
        let inventory = vec![
            descriptor(ResourceKind::PublicIpAddress, "pip"),
            descriptor(ResourceKind::NetworkInterface, "nic"),
            descriptor(ResourceKind::VirtualMachine, "vm"),
            descriptor(ResourceKind::VirtualNetwork, "vnet"),
            descriptor(ResourceKind::ManagedDisk, "disk"),
            descriptor(ResourceKind::Deployment, "nested"),
        ];
        let plan = TeardownPlan::build(inventory, &ForeignResources::default());

        assert_eq!(plan.compute, vec![descriptor(ResourceKind::VirtualMachine, "vm")]);
        assert_eq!(
            plan.network_interfaces,
            vec![descriptor(ResourceKind::NetworkInterface, "nic")]
        );
        assert_eq!(
            plan.independent,
            vec![
                descriptor(ResourceKind::PublicIpAddress, "pip"),
                descriptor(ResourceKind::VirtualNetwork, "vnet"),
            ]
        );
        assert_eq!(plan.disks.len(), 1);
        assert_eq!(plan.nested_deployments.len(), 1);
        assert!(plan.foreign.is_empty());
    }

    #[test]
    fn foreign_resources_are_excluded_case_insensitively() {
        let foreign = ForeignResources {
            security_group: Some("Shared-NSG".into()),
            virtual_network: Some("corp-vnet".into()),
            key_vault: None,
        };
        let inventory = vec![
            descriptor(ResourceKind::NetworkSecurityGroup, "shared-nsg"),
            descriptor(ResourceKind::NetworkSecurityGroup, "build-nsg"),
            descriptor(ResourceKind::VirtualNetwork, "CORP-VNET"),
            // Same name, different kind: still ours
            descriptor(ResourceKind::PublicIpAddress, "shared-nsg"),
        ];
        let plan = TeardownPlan::build(inventory, &foreign);

        assert_eq!(plan.foreign.len(), 2);
        assert_eq!(
            plan.independent,
            vec![
                descriptor(ResourceKind::NetworkSecurityGroup, "build-nsg"),
                descriptor(ResourceKind::PublicIpAddress, "shared-nsg"),
            ]
        );
    }

    #[test]
    fn describe_lists_nonempty_phases() {
        let plan = TeardownPlan::build(
            vec![
                descriptor(ResourceKind::VirtualMachine, "vm"),
                descriptor(ResourceKind::KeyVault, "kv"),
            ],
            &ForeignResources::default(),
        );
        let lines = plan.describe();
        assert_eq!(
            lines,
            vec![
                "1. compute (sequential)",
                "  virtual-machine 'vm'",
                "3. independent (concurrent)",
                "  key-vault 'kv'",
            ]
        );
        assert!(!plan.is_empty());
        assert!(TeardownPlan::default().is_empty());
    }
}
