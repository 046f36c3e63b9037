//! Integration tests for deployment teardown
//!
//! These run the real coordinator against the in-memory gateway with the
//! tokio clock paused, so retry delays and slow deletes are observed exactly.

use azbake_builder::arm::{ArmError, DiskSource, ResourceDescriptor, StorageProfile};
use azbake_builder::orchestrator::{
    CleanupReport, CleanupResult, DiskFlags, DiskPlan, ForeignResources, TeardownCoordinator,
    list_created_resources, resolve_disk_plan,
};
use azbake_builder::retry::{RetryExecutor, RetryPolicy};
use azbake_common::ResourceKind;
use azbake_test_utils::fixtures::{DEPLOYMENT, add_standard_build, managed_disk_id};
use azbake_test_utils::{
    FakeGateway, RecordingReporter, fast_executor, fast_retry, init_tracing, test_handle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn coordinator(
    gateway: &Arc<FakeGateway>,
    reporter: &Arc<RecordingReporter>,
    policy: RetryPolicy,
) -> TeardownCoordinator<FakeGateway> {
    let retry = RetryExecutor::new(policy, reporter.clone());
    TeardownCoordinator::new(Arc::clone(gateway), retry, reporter.clone())
}

async fn list(gateway: &FakeGateway) -> Vec<ResourceDescriptor> {
    list_created_resources(gateway, &test_handle(), &fast_executor(), &CancellationToken::new())
        .await
        .expect("inventory")
}

async fn plan_disks(
    gateway: &FakeGateway,
    inventory: &[ResourceDescriptor],
    flags: DiskFlags,
) -> DiskPlan {
    resolve_disk_plan(gateway, inventory, flags, &fast_executor(), &CancellationToken::new()).await
}

/// List, plan disks and tear down, the way cleanup does it
async fn run_teardown(
    gateway: &Arc<FakeGateway>,
    reporter: &Arc<RecordingReporter>,
    foreign: &ForeignResources,
    flags: DiskFlags,
) -> CleanupReport {
    let handle = test_handle();
    let inventory = list(gateway).await;
    let disks = plan_disks(gateway, &inventory, flags).await;
    coordinator(gateway, reporter, fast_retry())
        .teardown(&handle, inventory, foreign, &disks)
        .await
}

fn managed_os_disk(gateway: &FakeGateway, vm: &str, disk: &str) {
    gateway.set_storage_profile(
        vm,
        StorageProfile {
            os_disk: Some(DiskSource::Managed(managed_disk_id(disk))),
            data_disks: Vec::new(),
        },
    );
}

fn in_use() -> ArmError {
    ArmError::InUse {
        message: "NicInUse".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_simple_build_deletes_in_phase_order() {
    init_tracing();
    let gateway = Arc::new(FakeGateway::new());
    gateway
        .add_created_resource("Microsoft.Compute/virtualMachines", "v1")
        .add_created_resource("Microsoft.Network/networkInterfaces", "n1")
        .add_created_resource("Microsoft.Network/publicIPAddresses", "p1");
    managed_os_disk(&gateway, "v1", "v1-os");
    let reporter = Arc::new(RecordingReporter::new());

    let report = run_teardown(
        &gateway,
        &reporter,
        &ForeignResources::default(),
        DiskFlags {
            managed_build: true,
            ..Default::default()
        },
    )
    .await;

    assert_eq!(
        gateway.delete_sequence(),
        vec![
            "delete_virtual_machine:v1",
            "delete_network_interface:n1",
            "delete_public_ip_address:p1",
            "delete_managed_disk:v1-os",
            format!("delete_deployment:{DEPLOYMENT}").as_str(),
        ]
    );
    assert!(report.is_clean(), "{:?}", report.summary());
    assert!(report.outcomes.iter().all(|o| o.succeeded()));
    assert_eq!(report.count(CleanupResult::Deleted), 5);
    assert!(report.artifact.is_none());
    assert!(reporter.saw("Cleanup complete"));
}

#[tokio::test(start_paused = true)]
async fn test_nic_failure_does_not_stop_the_rest() {
    let gateway = Arc::new(FakeGateway::new());
    gateway
        .add_created_resource("Microsoft.Compute/virtualMachines", "v1")
        .add_created_resource("Microsoft.Network/networkInterfaces", "n1")
        .add_created_resource("Microsoft.Network/publicIPAddresses", "p1")
        // The fourth attempt would succeed, but the policy stops at three
        .fail_next(
            "delete_network_interface",
            "n1",
            vec![in_use(), in_use(), in_use()],
        );
    managed_os_disk(&gateway, "v1", "v1-os");
    let reporter = Arc::new(RecordingReporter::new());

    let report = run_teardown(
        &gateway,
        &reporter,
        &ForeignResources::default(),
        DiskFlags::default(),
    )
    .await;

    assert_eq!(gateway.call_count("delete_network_interface", "n1"), 3);
    let nic = report
        .outcome(ResourceKind::NetworkInterface, "n1")
        .expect("nic outcome");
    assert_eq!(nic.result, CleanupResult::Failed);
    assert_eq!(nic.attempts, 3);
    assert!(nic.error.as_deref().unwrap_or_default().contains("NicInUse"));

    let pip = report
        .outcome(ResourceKind::PublicIpAddress, "p1")
        .expect("pip outcome");
    assert!(pip.succeeded());
    let disk = report
        .outcome(ResourceKind::ManagedDisk, "v1-os")
        .expect("disk outcome");
    assert!(disk.succeeded());
    assert!(gateway.is_deleted("delete_deployment", DEPLOYMENT));

    assert_eq!(report.failures().count(), 1);
    assert!(!report.is_clean());
    assert!(
        report
            .summary()
            .iter()
            .any(|line| line.contains("network-interface 'n1'"))
    );
    assert!(reporter.saw("1 resource(s) of deployment"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_bound_and_growing_delays() {
    let gateway = Arc::new(FakeGateway::new());
    gateway
        .add_created_resource("Microsoft.Network/networkSecurityGroups", "nsg-1")
        .fail_always("delete_network_security_group", "nsg-1", in_use());
    let reporter = Arc::new(RecordingReporter::new());

    let report = run_teardown(
        &gateway,
        &reporter,
        &ForeignResources::default(),
        DiskFlags::default(),
    )
    .await;

    let calls = gateway.calls_of("delete_network_security_group");
    assert_eq!(calls.len(), fast_retry().max_attempts as usize);
    let gaps: Vec<Duration> = calls
        .windows(2)
        .map(|pair| pair[1].started - pair[0].started)
        .collect();
    assert_eq!(
        gaps,
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );

    let outcome = report
        .outcome(ResourceKind::NetworkSecurityGroup, "nsg-1")
        .expect("nsg outcome");
    assert_eq!(outcome.result, CleanupResult::Failed);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(reporter.error_messages().len(), 2, "give-up plus summary");
}

#[tokio::test(start_paused = true)]
async fn test_nic_waits_for_vm_retries() {
    let gateway = Arc::new(FakeGateway::new());
    add_standard_build(&gateway);
    gateway.fail_next(
        "delete_virtual_machine",
        "vm-1",
        vec![ArmError::Throttled, ArmError::Throttled],
    );
    let reporter = Arc::new(RecordingReporter::new());

    let report = run_teardown(
        &gateway,
        &reporter,
        &ForeignResources::default(),
        DiskFlags::default(),
    )
    .await;

    let vm_calls = gateway.calls_of("delete_virtual_machine");
    let nic_calls = gateway.calls_of("delete_network_interface");
    assert_eq!(vm_calls.len(), 3);
    assert_eq!(nic_calls.len(), 1);

    let vm_done = vm_calls
        .last()
        .and_then(|c| c.finished)
        .expect("vm call finished");
    assert!(nic_calls[0].started >= vm_done);

    let nic_done = nic_calls[0].finished.expect("nic call finished");
    for op in [
        "delete_public_ip_address",
        "delete_virtual_network",
        "delete_network_security_group",
        "delete_key_vault",
    ] {
        let call = &gateway.calls_of(op)[0];
        assert!(call.started >= nic_done, "{op} started before the NIC was gone");
    }
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_vm_failure_still_attempts_nic() {
    let gateway = Arc::new(FakeGateway::new());
    gateway
        .add_created_resource("Microsoft.Compute/virtualMachines", "vm-1")
        .add_created_resource("Microsoft.Network/networkInterfaces", "nic-1")
        .fail_always(
            "delete_virtual_machine",
            "vm-1",
            ArmError::Api {
                status: 403,
                code: Some("AuthorizationFailed".into()),
                message: "denied".into(),
            },
        );
    let reporter = Arc::new(RecordingReporter::new());

    let report = run_teardown(
        &gateway,
        &reporter,
        &ForeignResources::default(),
        DiskFlags::default(),
    )
    .await;

    let vm_last = gateway
        .calls_of("delete_virtual_machine")
        .last()
        .and_then(|c| c.finished)
        .expect("vm call finished");
    let nic = &gateway.calls_of("delete_network_interface")[0];
    assert!(nic.started >= vm_last);

    assert_eq!(
        report
            .outcome(ResourceKind::VirtualMachine, "vm-1")
            .map(|o| o.result),
        Some(CleanupResult::Failed)
    );
    assert!(gateway.is_deleted("delete_network_interface", "nic-1"));
    assert!(gateway.is_deleted("delete_deployment", DEPLOYMENT));
}

#[tokio::test(start_paused = true)]
async fn test_slow_delete_does_not_block_siblings() {
    let gateway = Arc::new(FakeGateway::new());
    add_standard_build(&gateway);
    managed_os_disk(&gateway, "vm-1", "vm-1-os");
    gateway.set_delay(
        "delete_virtual_network",
        "vnet-1",
        Duration::from_secs(120),
    );
    let reporter = Arc::new(RecordingReporter::new());

    let report = run_teardown(
        &gateway,
        &reporter,
        &ForeignResources::default(),
        DiskFlags::default(),
    )
    .await;

    let vnet = &gateway.calls_of("delete_virtual_network")[0];
    let vnet_done = vnet.finished.expect("vnet finished");
    assert_eq!(vnet_done - vnet.started, Duration::from_secs(120));

    for op in [
        "delete_public_ip_address",
        "delete_network_security_group",
        "delete_key_vault",
    ] {
        let call = &gateway.calls_of(op)[0];
        assert_eq!(call.started, vnet.started, "{op} was not started alongside the vnet");
        assert!(call.finished.expect("finished") < vnet_done);
    }

    // The barrier holds until the slow delete finishes
    let disk = &gateway.calls_of("delete_managed_disk")[0];
    assert!(disk.started >= vnet_done);
    let deployment = &gateway.calls_of("delete_deployment")[0];
    assert!(deployment.started >= vnet_done);

    assert_eq!(
        report
            .outcome(ResourceKind::VirtualNetwork, "vnet-1")
            .map(|o| o.result),
        Some(CleanupResult::Deleted)
    );
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_deployment_deleted_last() {
    let gateway = Arc::new(FakeGateway::new());
    add_standard_build(&gateway);
    gateway.add_created_resource("Microsoft.Resources/deployments", "nested-net");
    managed_os_disk(&gateway, "vm-1", "vm-1-os");
    let reporter = Arc::new(RecordingReporter::new());

    run_teardown(
        &gateway,
        &reporter,
        &ForeignResources::default(),
        DiskFlags::default(),
    )
    .await;

    let sequence = gateway.delete_sequence();
    assert_eq!(
        sequence.last().map(String::as_str),
        Some(format!("delete_deployment:{DEPLOYMENT}").as_str())
    );
    let nested = sequence
        .iter()
        .position(|s| s == "delete_deployment:nested-net")
        .expect("nested deployment deleted");
    let disk = sequence
        .iter()
        .position(|s| s == "delete_managed_disk:vm-1-os")
        .expect("disk deleted");
    assert!(disk < nested);
    assert_eq!(nested, sequence.len() - 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_teardown_is_already_deleted() {
    let gateway = Arc::new(FakeGateway::new());
    add_standard_build(&gateway);
    managed_os_disk(&gateway, "vm-1", "vm-1-os");
    let reporter = Arc::new(RecordingReporter::new());
    let handle = test_handle();

    let inventory = list(&gateway).await;
    let disks = plan_disks(&gateway, &inventory, DiskFlags::default()).await;
    let coordinator = coordinator(&gateway, &reporter, fast_retry());
    let foreign = ForeignResources::default();

    let first = coordinator
        .teardown(&handle, inventory.clone(), &foreign, &disks)
        .await;
    assert!(first.is_clean());

    let second = coordinator.teardown(&handle, inventory, &foreign, &disks).await;
    assert!(second.is_clean(), "{:?}", second.summary());
    assert_eq!(second.count(CleanupResult::Failed), 0);
    assert_eq!(second.count(CleanupResult::AlreadyDeleted), second.outcomes.len());
    assert!(second.outcomes.iter().all(|o| o.attempts == 1));
}

#[tokio::test(start_paused = true)]
async fn test_not_found_on_first_attempt_is_success() {
    let gateway = Arc::new(FakeGateway::new());
    gateway
        .add_created_resource("Microsoft.KeyVault/vaults", "kv-1")
        .fail_next(
            "delete_key_vault",
            "kv-1",
            vec![ArmError::NotFound {
                resource: "kv-1".into(),
            }],
        );
    let reporter = Arc::new(RecordingReporter::new());

    let report = run_teardown(
        &gateway,
        &reporter,
        &ForeignResources::default(),
        DiskFlags::default(),
    )
    .await;

    let kv = report
        .outcome(ResourceKind::KeyVault, "kv-1")
        .expect("kv outcome");
    assert_eq!(kv.result, CleanupResult::AlreadyDeleted);
    assert!(kv.error.is_none());
    assert_eq!(gateway.call_count("delete_key_vault", "kv-1"), 1);
    assert!(reporter.error_messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_foreign_security_group_is_never_deleted() {
    let gateway = Arc::new(FakeGateway::new());
    add_standard_build(&gateway);
    let reporter = Arc::new(RecordingReporter::new());
    let foreign = ForeignResources {
        security_group: Some("NSG-1".into()),
        ..Default::default()
    };

    let report = run_teardown(&gateway, &reporter, &foreign, DiskFlags::default()).await;

    assert!(
        gateway
            .delete_sequence()
            .iter()
            .all(|call| !call.contains("nsg-1"))
    );
    assert_eq!(gateway.call_count("delete_network_security_group", "nsg-1"), 0);
    assert_eq!(
        report
            .outcome(ResourceKind::NetworkSecurityGroup, "nsg-1")
            .map(|o| o.result),
        Some(CleanupResult::Skipped)
    );
    assert!(report.is_clean());
    assert!(reporter.saw("not owned by this build"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_retries() {
    let gateway = Arc::new(FakeGateway::new());
    gateway
        .add_created_resource("Microsoft.Network/publicIPAddresses", "pip-1")
        .fail_always("delete_public_ip_address", "pip-1", ArmError::Throttled);
    let reporter = Arc::new(RecordingReporter::new());
    let handle = test_handle();
    let inventory = list(&gateway).await;

    let policy = RetryPolicy {
        max_attempts: 10,
        initial_backoff: Duration::from_secs(10),
        max_backoff: Duration::from_secs(10),
        multiplier: 1.0,
    };
    let cancel = CancellationToken::new();
    let coordinator = coordinator(&gateway, &reporter, policy).with_cancellation(cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        cancel.cancel();
    });
    let report = coordinator
        .teardown(
            &handle,
            inventory,
            &ForeignResources::default(),
            &DiskPlan::empty(DiskFlags::default()),
        )
        .await;
    canceller.await.expect("canceller");

    assert_eq!(gateway.call_count("delete_public_ip_address", "pip-1"), 2);
    let pip = report
        .outcome(ResourceKind::PublicIpAddress, "pip-1")
        .expect("pip outcome");
    assert_eq!(pip.result, CleanupResult::Failed);
    // The deployment delete sees the cancelled token too
    assert_eq!(gateway.call_count("delete_deployment", DEPLOYMENT), 0);
}
