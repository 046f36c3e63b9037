//! Scriptable in-memory [`ResourceGateway`]
//!
//! Every call is recorded with its start and end time (tokio clock, so
//! paused-time tests see exact delays). Failures, delays and deployment
//! states can be scripted per operation and target.

use azbake_builder::arm::{
    ArmError, BlobLocation, DeploymentHandle, DeploymentOperation, DeploymentRequest,
    DeploymentStatus, ManagedDiskId, OperationsPage, ProvisioningState, ResourceGateway,
    StorageProfile, TargetResource,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Gateway method name, e.g. `delete_network_interface`
    pub op: String,
    /// Resource name, disk name, blob URL or deployment name
    pub target: String,
    pub started: Instant,
    /// `None` while in flight
    pub finished: Option<Instant>,
    pub succeeded: bool,
}

#[derive(Default)]
struct State {
    operations: Vec<DeploymentOperation>,
    page_size: usize,
    deployment_created: bool,
    deployment_missing: bool,
    deployment_states: VecDeque<ProvisioningState>,
    deployment_error: Option<serde_json::Value>,
    storage: HashMap<String, StorageProfile>,
    scripted: HashMap<(String, String), VecDeque<ArmError>>,
    page_failures: HashMap<usize, VecDeque<ArmError>>,
    always: HashMap<(String, String), ArmError>,
    delays: HashMap<(String, String), Duration>,
    leases: HashSet<String>,
    deleted: HashSet<(String, String)>,
    calls: Vec<Call>,
}

/// In-memory gateway for orchestration tests
pub struct FakeGateway {
    state: Mutex<State>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn key(op: &str, target: &str) -> (String, String) {
    (op.to_string(), target.to_ascii_lowercase())
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                page_size: 50,
                deployment_states: VecDeque::from([ProvisioningState::Succeeded]),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- scripting -------------------------------------------------------

    /// Record an operation targeting `resource_type`/`name` in the deployment log
    pub fn add_created_resource(&self, resource_type: &str, name: &str) -> &Self {
        self.state().operations.push(DeploymentOperation {
            target: Some(TargetResource {
                resource_type: resource_type.to_string(),
                resource_name: name.to_string(),
            }),
        });
        self
    }

    /// Record an operation with no target resource
    pub fn add_untargeted_operation(&self) -> &Self {
        self.state().operations.push(DeploymentOperation { target: None });
        self
    }

    /// Split the operation log into pages of `size`
    pub fn set_page_size(&self, size: usize) -> &Self {
        self.state().page_size = size.max(1);
        self
    }

    /// The deployment was never created
    pub fn set_deployment_missing(&self) -> &Self {
        self.state().deployment_missing = true;
        self
    }

    /// States returned by successive `get_deployment` calls; the last repeats
    pub fn set_deployment_states(&self, states: &[ProvisioningState]) -> &Self {
        self.state().deployment_states = states.iter().copied().collect();
        self
    }

    pub fn set_deployment_error(&self, error: serde_json::Value) -> &Self {
        self.state().deployment_error = Some(error);
        self
    }

    pub fn set_storage_profile(&self, vm: &str, profile: StorageProfile) -> &Self {
        self.state().storage.insert(vm.to_ascii_lowercase(), profile);
        self
    }

    /// Fail the next calls of `op` on `target` with these errors, in order
    pub fn fail_next(&self, op: &str, target: &str, errors: Vec<ArmError>) -> &Self {
        self.state()
            .scripted
            .entry(key(op, target))
            .or_default()
            .extend(errors);
        self
    }

    /// Fail the next fetches of operation log page `page` (0-based)
    pub fn fail_page(&self, page: usize, errors: Vec<ArmError>) -> &Self {
        self.state()
            .page_failures
            .entry(page)
            .or_default()
            .extend(errors);
        self
    }

    /// Fail every call of `op` on `target`
    pub fn fail_always(&self, op: &str, target: &str, error: ArmError) -> &Self {
        self.state().always.insert(key(op, target), error);
        self
    }

    /// Make every call of `op` on `target` take `delay`
    pub fn set_delay(&self, op: &str, target: &str, delay: Duration) -> &Self {
        self.state().delays.insert(key(op, target), delay);
        self
    }

    /// Hold a lease on the blob at `url`
    pub fn hold_lease(&self, url: &str) -> &Self {
        self.state().leases.insert(url.to_string());
        self
    }

    // --- inspection ------------------------------------------------------

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Calls of `op`, in start order
    pub fn calls_of(&self, op: &str) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, op: &str, target: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op == op && c.target.eq_ignore_ascii_case(target))
            .count()
    }

    /// Ops of all delete calls, as `op:target`, in start order
    pub fn delete_sequence(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op.starts_with("delete_") || c.op == "break_blob_lease")
            .map(|c| format!("{}:{}", c.op, c.target))
            .collect()
    }

    pub fn is_deleted(&self, op: &str, target: &str) -> bool {
        self.state().deleted.contains(&key(op, target))
    }

    // --- call plumbing ---------------------------------------------------

    /// Record the start of a call and decide its scripted result
    fn begin(&self, op: &str, target: &str) -> (usize, Option<Duration>, Option<ArmError>) {
        let mut state = self.state();
        let k = key(op, target);
        let error = match state.scripted.get_mut(&k).and_then(VecDeque::pop_front) {
            Some(e) => Some(e),
            None => state.always.get(&k).cloned(),
        };
        let delay = state.delays.get(&k).copied();
        state.calls.push(Call {
            op: op.to_string(),
            target: target.to_string(),
            started: Instant::now(),
            finished: None,
            succeeded: false,
        });
        (state.calls.len() - 1, delay, error)
    }

    fn end(&self, index: usize, succeeded: bool) {
        let mut state = self.state();
        if let Some(call) = state.calls.get_mut(index) {
            call.finished = Some(Instant::now());
            call.succeeded = succeeded;
        }
    }

    /// Run a call: record it, wait out any delay, then apply `effect`
    async fn call<T>(
        &self,
        op: &str,
        target: &str,
        effect: impl FnOnce(&mut State) -> Result<T, ArmError>,
    ) -> Result<T, ArmError> {
        let (index, delay, error) = self.begin(op, target);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = match error {
            Some(e) => Err(e),
            None => effect(&mut self.state()),
        };
        self.end(index, result.is_ok());
        result
    }

    async fn delete(&self, op: &str, target: &str) -> Result<(), ArmError> {
        self.call(op, target, |state| {
            if state.deleted.insert(key(op, target)) {
                Ok(())
            } else {
                Err(ArmError::NotFound {
                    resource: target.to_string(),
                })
            }
        })
        .await
    }
}

impl ResourceGateway for FakeGateway {
    async fn create_deployment(
        &self,
        handle: &DeploymentHandle,
        _request: &DeploymentRequest,
    ) -> Result<(), ArmError> {
        self.call("create_deployment", &handle.deployment_name, |state| {
            state.deployment_created = true;
            state.deployment_missing = false;
            Ok(())
        })
        .await
    }

    async fn get_deployment(&self, handle: &DeploymentHandle) -> Result<DeploymentStatus, ArmError> {
        self.call("get_deployment", &handle.deployment_name, |state| {
            let state_now = if state.deployment_states.len() > 1 {
                state.deployment_states.pop_front()
            } else {
                state.deployment_states.front().copied()
            }
            .unwrap_or(ProvisioningState::Running);
            Ok(DeploymentStatus {
                state: state_now,
                error: state.deployment_error.clone(),
            })
        })
        .await
    }

    async fn list_deployment_operations(
        &self,
        handle: &DeploymentHandle,
        next_link: Option<&str>,
    ) -> Result<OperationsPage, ArmError> {
        let name = handle.deployment_name.clone();
        self.call("list_deployment_operations", &handle.deployment_name, |state| {
            if state.deployment_missing
                || state.deleted.contains(&key("delete_deployment", &name))
            {
                return Err(ArmError::NotFound { resource: name });
            }
            let page: usize = match next_link {
                Some(link) => link
                    .rsplit('=')
                    .next()
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| ArmError::InvalidResponse(format!("bad next link {link}")))?,
                None => 0,
            };
            if let Some(e) = state
                .page_failures
                .get_mut(&page)
                .and_then(VecDeque::pop_front)
            {
                return Err(e);
            }
            let start = page * state.page_size;
            let operations: Vec<_> = state
                .operations
                .iter()
                .skip(start)
                .take(state.page_size)
                .cloned()
                .collect();
            let next_link = (start + state.page_size < state.operations.len())
                .then(|| format!("https://fake/operations?page={}", page + 1));
            Ok(OperationsPage {
                operations,
                next_link,
            })
        })
        .await
    }

    async fn delete_deployment(&self, handle: &DeploymentHandle) -> Result<(), ArmError> {
        self.delete("delete_deployment", &handle.deployment_name)
            .await
    }

    async fn get_virtual_machine_storage(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<StorageProfile, ArmError> {
        self.call("get_virtual_machine_storage", name, |state| {
            if state.deleted.contains(&key("delete_virtual_machine", name)) {
                return Err(ArmError::NotFound {
                    resource: name.to_string(),
                });
            }
            Ok(state
                .storage
                .get(&name.to_ascii_lowercase())
                .cloned()
                .unwrap_or_default())
        })
        .await
    }

    async fn delete_virtual_machine(&self, _resource_group: &str, name: &str) -> Result<(), ArmError> {
        self.delete("delete_virtual_machine", name).await
    }

    async fn delete_network_interface(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<(), ArmError> {
        self.delete("delete_network_interface", name).await
    }

    async fn delete_virtual_network(&self, _resource_group: &str, name: &str) -> Result<(), ArmError> {
        self.delete("delete_virtual_network", name).await
    }

    async fn delete_network_security_group(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<(), ArmError> {
        self.delete("delete_network_security_group", name).await
    }

    async fn delete_public_ip_address(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<(), ArmError> {
        self.delete("delete_public_ip_address", name).await
    }

    async fn delete_key_vault(&self, _resource_group: &str, name: &str) -> Result<(), ArmError> {
        self.delete("delete_key_vault", name).await
    }

    async fn delete_managed_disk(&self, disk: &ManagedDiskId) -> Result<(), ArmError> {
        self.delete("delete_managed_disk", &disk.name).await
    }

    async fn break_blob_lease(&self, blob: &BlobLocation) -> Result<(), ArmError> {
        let url = blob.url.clone();
        self.call("break_blob_lease", &blob.url, |state| {
            if state.deleted.contains(&key("delete_blob", &url)) {
                Err(ArmError::NotFound { resource: url })
            } else if state.leases.remove(&url) {
                Ok(())
            } else {
                Err(ArmError::LeaseNotPresent)
            }
        })
        .await
    }

    async fn delete_blob(&self, blob: &BlobLocation) -> Result<(), ArmError> {
        let url = blob.url.clone();
        if self.state().leases.contains(&url) {
            return self
                .call("delete_blob", &url, |_| {
                    Err(ArmError::Conflict {
                        message: "There is currently a lease on the blob".into(),
                    })
                })
                .await;
        }
        self.delete("delete_blob", &url).await
    }
}
