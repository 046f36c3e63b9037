//! Per-kind deletion strategies
//!
//! Teardown never switches on the resource kind; it looks the kind up in a
//! [`DeleterTable`] and runs whatever strategy is registered.

use crate::arm::{ArmError, DeploymentHandle, ResourceDescriptor, ResourceGateway};
use azbake_common::ResourceKind;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;

/// Deletes one kind of resource through the gateway
pub trait Deletable<G: ResourceGateway>: Send + Sync {
    fn delete<'a>(
        &'a self,
        gateway: &'a G,
        resource: &'a ResourceDescriptor,
    ) -> BoxFuture<'a, Result<(), ArmError>>;
}

macro_rules! group_scoped_deleter {
    ($(#[$doc:meta])* $name:ident => $method:ident) => {
        $(#[$doc])*
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl<G: ResourceGateway> Deletable<G> for $name {
            fn delete<'a>(
                &'a self,
                gateway: &'a G,
                resource: &'a ResourceDescriptor,
            ) -> BoxFuture<'a, Result<(), ArmError>> {
                gateway
                    .$method(&resource.resource_group, &resource.name)
                    .boxed()
            }
        }
    };
}

group_scoped_deleter!(
    /// Deletes a VM; its disks are handled separately
    VirtualMachineDeleter => delete_virtual_machine
);
group_scoped_deleter!(NetworkInterfaceDeleter => delete_network_interface);
group_scoped_deleter!(VirtualNetworkDeleter => delete_virtual_network);
group_scoped_deleter!(NetworkSecurityGroupDeleter => delete_network_security_group);
group_scoped_deleter!(PublicIpAddressDeleter => delete_public_ip_address);
group_scoped_deleter!(KeyVaultDeleter => delete_key_vault);

/// Deletes a nested deployment created by the build's template
#[derive(Debug, Clone)]
pub struct NestedDeploymentDeleter {
    subscription_id: String,
}

impl<G: ResourceGateway> Deletable<G> for NestedDeploymentDeleter {
    fn delete<'a>(
        &'a self,
        gateway: &'a G,
        resource: &'a ResourceDescriptor,
    ) -> BoxFuture<'a, Result<(), ArmError>> {
        async move {
            let handle = DeploymentHandle::new(
                &self.subscription_id,
                &resource.resource_group,
                &resource.name,
            );
            gateway.delete_deployment(&handle).await
        }
        .boxed()
    }
}

/// Mapping from resource kind to its deletion strategy
pub struct DeleterTable<G> {
    deleters: HashMap<ResourceKind, Box<dyn Deletable<G>>>,
}

impl<G: ResourceGateway> Default for DeleterTable<G> {
    fn default() -> Self {
        Self {
            deleters: HashMap::new(),
        }
    }
}

impl<G: ResourceGateway> DeleterTable<G> {
    /// Strategies for every kind a build deployment creates.
    ///
    /// Disks are absent: they go through the disk policy instead.
    pub fn standard(subscription_id: &str) -> Self {
        let mut table = Self::default();
        table.register(ResourceKind::VirtualMachine, VirtualMachineDeleter);
        table.register(ResourceKind::NetworkInterface, NetworkInterfaceDeleter);
        table.register(ResourceKind::VirtualNetwork, VirtualNetworkDeleter);
        table.register(ResourceKind::NetworkSecurityGroup, NetworkSecurityGroupDeleter);
        table.register(ResourceKind::PublicIpAddress, PublicIpAddressDeleter);
        table.register(ResourceKind::KeyVault, KeyVaultDeleter);
        table.register(
            ResourceKind::Deployment,
            NestedDeploymentDeleter {
                subscription_id: subscription_id.to_string(),
            },
        );
        table
    }

    pub fn register(&mut self, kind: ResourceKind, deleter: impl Deletable<G> + 'static) {
        self.deleters.insert(kind, Box::new(deleter));
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&dyn Deletable<G>> {
        self.deleters.get(&kind).map(|d| d.as_ref())
    }

    pub fn supports(&self, kind: ResourceKind) -> bool {
        self.deleters.contains_key(&kind)
    }
}
