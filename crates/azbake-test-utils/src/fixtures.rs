//! Common fixtures

use crate::gateway::FakeGateway;
use azbake_builder::arm::DeploymentHandle;
use azbake_builder::progress::{LogReporter, Reporter};
use azbake_builder::retry::{RetryExecutor, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";
pub const RESOURCE_GROUP: &str = "bake-rg";
pub const DEPLOYMENT: &str = "azbake-test";

pub fn test_handle() -> DeploymentHandle {
    DeploymentHandle::new(SUBSCRIPTION, RESOURCE_GROUP, DEPLOYMENT)
}

/// Three attempts, 100ms doubling up to 400ms
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(400),
        multiplier: 2.0,
    }
}

/// [`fast_retry`] executor that only logs
pub fn fast_executor() -> RetryExecutor {
    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter::new());
    RetryExecutor::new(fast_retry(), reporter)
}

/// ARM id of a managed disk in the test resource group
pub fn managed_disk_id(name: &str) -> String {
    format!(
        "/subscriptions/{SUBSCRIPTION}/resourceGroups/{RESOURCE_GROUP}/providers/Microsoft.Compute/disks/{name}"
    )
}

/// URL of a VHD blob in the test storage account
pub fn vhd_url(blob: &str) -> String {
    format!("https://bakestorage.blob.core.windows.net/images/{blob}")
}

/// The resources a typical build template creates
pub fn add_standard_build(gateway: &FakeGateway) {
    gateway
        .add_created_resource("Microsoft.Network/publicIPAddresses", "pip-1")
        .add_created_resource("Microsoft.Network/virtualNetworks", "vnet-1")
        .add_created_resource("Microsoft.Network/networkSecurityGroups", "nsg-1")
        .add_created_resource("Microsoft.KeyVault/vaults", "kv-1")
        .add_created_resource("Microsoft.Network/networkInterfaces", "nic-1")
        .add_created_resource("Microsoft.Compute/virtualMachines", "vm-1");
}

/// Log to the test writer; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
