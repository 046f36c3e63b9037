//! Azure resource kinds and teardown ordering
//!
//! Every resource the builder can delete maps to exactly one ARM provider
//! type and one deletion phase. Phases are processed strictly in order; the
//! resources inside [`DeletionPhase::Independent`] have no ordering among
//! themselves.

use serde::{Deserialize, Serialize};

/// Types of Azure resources managed by azbake
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ResourceKind {
    /// Compute instance (holds the NIC attachment and the disk lease)
    VirtualMachine,
    /// Network interface (cannot be deleted while attached to a VM)
    NetworkInterface,
    VirtualNetwork,
    NetworkSecurityGroup,
    PublicIpAddress,
    KeyVault,
    /// Managed OS or data disk
    ManagedDisk,
    /// Unmanaged VHD page blob
    Blob,
    /// The template deployment object itself
    Deployment,
}

/// Ordered teardown bucket (lower = deleted first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DeletionPhase {
    /// The VM, deleted synchronously before anything else
    Compute = 0,
    /// The VM's network interface, deleted synchronously once the VM is gone
    NetworkInterface = 1,
    /// Everything else, deleted concurrently
    Independent = 2,
    /// OS and data disks, handled by the disk disposition policy
    Disk = 3,
    /// The deployment object, always attempted last
    Deployment = 4,
}

impl ResourceKind {
    /// ARM provider type, e.g. `Microsoft.Compute/virtualMachines`.
    ///
    /// Blobs live on the storage data plane and have no provider type.
    pub fn provider_type(self) -> Option<&'static str> {
        match self {
            Self::VirtualMachine => Some("Microsoft.Compute/virtualMachines"),
            Self::NetworkInterface => Some("Microsoft.Network/networkInterfaces"),
            Self::VirtualNetwork => Some("Microsoft.Network/virtualNetworks"),
            Self::NetworkSecurityGroup => Some("Microsoft.Network/networkSecurityGroups"),
            Self::PublicIpAddress => Some("Microsoft.Network/publicIPAddresses"),
            Self::KeyVault => Some("Microsoft.KeyVault/vaults"),
            Self::ManagedDisk => Some("Microsoft.Compute/disks"),
            Self::Deployment => Some("Microsoft.Resources/deployments"),
            Self::Blob => None,
        }
    }

    /// Parse an ARM provider type (case-insensitive, as ARM treats them).
    ///
    /// Returns `None` for types azbake never deletes directly, such as VM
    /// extensions or subnets, which go away with their parent.
    pub fn from_provider_type(provider_type: &str) -> Option<Self> {
        use strum::IntoEnumIterator;

        Self::iter().find(|kind| {
            kind.provider_type()
                .is_some_and(|t| t.eq_ignore_ascii_case(provider_type))
        })
    }

    /// ARM api-version used for requests against this kind
    pub fn api_version(self) -> &'static str {
        match self {
            Self::VirtualMachine => "2023-03-01",
            Self::ManagedDisk => "2023-01-02",
            Self::NetworkInterface
            | Self::VirtualNetwork
            | Self::NetworkSecurityGroup
            | Self::PublicIpAddress => "2023-04-01",
            Self::KeyVault => "2022-07-01",
            Self::Deployment => "2022-09-01",
            Self::Blob => "2021-08-06",
        }
    }

    /// Teardown bucket for this kind
    pub fn deletion_phase(self) -> DeletionPhase {
        match self {
            Self::VirtualMachine => DeletionPhase::Compute,
            Self::NetworkInterface => DeletionPhase::NetworkInterface,
            Self::VirtualNetwork
            | Self::NetworkSecurityGroup
            | Self::PublicIpAddress
            | Self::KeyVault => DeletionPhase::Independent,
            Self::ManagedDisk | Self::Blob => DeletionPhase::Disk,
            Self::Deployment => DeletionPhase::Deployment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_vm_before_nic_before_rest() {
        assert!(
            ResourceKind::VirtualMachine.deletion_phase()
                < ResourceKind::NetworkInterface.deletion_phase(),
            "VM must be deleted before its NIC"
        );
        for kind in [
            ResourceKind::VirtualNetwork,
            ResourceKind::NetworkSecurityGroup,
            ResourceKind::PublicIpAddress,
            ResourceKind::KeyVault,
        ] {
            assert!(ResourceKind::NetworkInterface.deletion_phase() < kind.deletion_phase());
        }
    }

    #[test]
    fn test_deployment_is_last() {
        for kind in ResourceKind::iter().filter(|k| *k != ResourceKind::Deployment) {
            assert!(kind.deletion_phase() < ResourceKind::Deployment.deletion_phase());
        }
    }

    #[test]
    fn test_provider_type_lookup_is_case_insensitive() {
        assert_eq!(
            ResourceKind::from_provider_type("microsoft.network/publicipaddresses"),
            Some(ResourceKind::PublicIpAddress)
        );
        assert_eq!(
            ResourceKind::from_provider_type("Microsoft.Compute/virtualMachines"),
            Some(ResourceKind::VirtualMachine)
        );
    }

    #[test]
    fn test_unknown_provider_types() {
        assert_eq!(
            ResourceKind::from_provider_type("Microsoft.Compute/virtualMachines/extensions"),
            None
        );
        assert_eq!(ResourceKind::from_provider_type(""), None);
    }

    #[test]
    fn test_display_and_serde_agree() {
        let json = serde_json::to_string(&ResourceKind::NetworkSecurityGroup).unwrap();
        assert_eq!(json, "\"network-security-group\"");
        assert_eq!(
            ResourceKind::NetworkSecurityGroup.to_string(),
            "network-security-group"
        );
    }
}
