//! ARM request/response types used across the gateway boundary

use azbake_common::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one template deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentHandle {
    pub subscription_id: String,
    pub resource_group: String,
    pub deployment_name: String,
}

impl DeploymentHandle {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        deployment_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            deployment_name: deployment_name.into(),
        }
    }

    /// ARM path of the deployment (without the endpoint)
    pub fn path(&self) -> String {
        format!(
            "/subscriptions/{}/resourcegroups/{}/providers/Microsoft.Resources/deployments/{}",
            self.subscription_id, self.resource_group, self.deployment_name
        )
    }
}

impl fmt::Display for DeploymentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.deployment_name)
    }
}

/// Template and parameters submitted for a deployment
#[derive(Debug, Clone, Default)]
pub struct DeploymentRequest {
    pub template: serde_json::Value,
    pub parameters: serde_json::Value,
}

impl DeploymentRequest {
    /// Request body for `PUT .../deployments/{name}` in incremental mode
    pub fn to_body(&self) -> serde_json::Value {
        let parameters = if self.parameters.is_null() {
            serde_json::json!({})
        } else {
            self.parameters.clone()
        };
        serde_json::json!({
            "properties": {
                "mode": "Incremental",
                "template": self.template,
                "parameters": parameters,
            }
        })
    }
}

/// ARM provisioning state of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ProvisioningState {
    Accepted,
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// Any in-progress state ARM adds later (Creating, Updating, ...)
    Other,
}

impl ProvisioningState {
    /// Parse, mapping unknown values to [`ProvisioningState::Other`]
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or(Self::Other)
    }

    /// Check if polling can stop
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Current status of a deployment
#[derive(Debug, Clone)]
pub struct DeploymentStatus {
    pub state: ProvisioningState,
    /// Structured error body reported by ARM, if any
    pub error: Option<serde_json::Value>,
}

/// Resource an operation acted upon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResource {
    pub resource_type: String,
    pub resource_name: String,
}

/// One entry in a deployment's operation log
#[derive(Debug, Clone, Default)]
pub struct DeploymentOperation {
    /// Missing for operations ARM synthesizes without a target
    pub target: Option<TargetResource>,
}

/// One page of the operation log
#[derive(Debug, Clone, Default)]
pub struct OperationsPage {
    pub operations: Vec<DeploymentOperation>,
    pub next_link: Option<String>,
}

/// A concrete resource created by a deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    pub resource_group: String,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            resource_group: resource_group.into(),
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Where a VM disk is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskSource {
    /// Managed disk, identified by its ARM resource id
    Managed(String),
    /// Unmanaged VHD, identified by its blob URI
    Vhd(String),
}

/// Data disk attached at a LUN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDisk {
    pub lun: i32,
    pub source: DiskSource,
}

/// Disks referenced by a VM's storage profile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageProfile {
    pub os_disk: Option<DiskSource>,
    pub data_disks: Vec<DataDisk>,
}
