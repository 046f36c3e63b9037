//! REST implementation of [`ResourceGateway`]
//!
//! Talks to the ARM management plane for deployments and resources, and to
//! the blob data plane for VHD lease and delete calls. Long-running
//! operations are polled through `Azure-AsyncOperation` or `Location`.

use super::context::ArmContext;
use super::error::{ArmError, classify_arm_error};
use super::gateway::ResourceGateway;
use super::resource_id::{BlobLocation, ManagedDiskId};
use super::types::{
    DataDisk, DeploymentHandle, DeploymentOperation, DeploymentRequest, DeploymentStatus,
    DiskSource, OperationsPage, ProvisioningState, StorageProfile, TargetResource,
};
use crate::wait::{Readiness, wait_for_resource};
use azbake_common::ResourceKind;
use azbake_common::defaults::DEPLOYMENT_OPERATIONS_PAGE_SIZE;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const ASYNC_OPERATION: &str = "azure-asyncoperation";
const LOCATION: &str = "location";
const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// ARM client bound to one subscription
#[derive(Debug, Clone)]
pub struct ArmClient {
    ctx: ArmContext,
    subscription_id: String,
}

impl ArmClient {
    pub fn from_context(ctx: &ArmContext, subscription_id: &str) -> Self {
        Self {
            ctx: ctx.clone(),
            subscription_id: subscription_id.to_string(),
        }
    }

    fn url(&self, path: &str, kind: ResourceKind) -> String {
        format!(
            "{}{}?api-version={}",
            self.ctx.endpoint(),
            path,
            kind.api_version()
        )
    }

    fn resource_path(&self, resource_group: &str, kind: ResourceKind, name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
            self.subscription_id,
            resource_group,
            kind.provider_type().unwrap_or_default(),
            name
        )
    }

    async fn send(&self, request: RequestBuilder, token: &str) -> Result<Response, ArmError> {
        let response = request.bearer_auth(token).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ArmError> {
        let response = self
            .send(self.ctx.http().get(url), self.ctx.management_token())
            .await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ArmError::InvalidResponse(e.to_string()))
    }

    /// DELETE a management-plane resource and wait for the operation to finish
    async fn delete_and_wait(&self, url: &str, label: &str) -> Result<(), ArmError> {
        let response = self
            .send(self.ctx.http().delete(url), self.ctx.management_token())
            .await?;
        self.complete(response, label).await
    }

    /// Wait for the long-running operation behind `response`, if any
    async fn complete(&self, response: Response, label: &str) -> Result<(), ArmError> {
        if !matches!(response.status(), StatusCode::CREATED | StatusCode::ACCEPTED) {
            return Ok(());
        }
        let Some(monitor) = Monitor::from_headers(response.headers()) else {
            debug!(resource = %label, "Accepted without a status monitor");
            return Ok(());
        };

        wait_for_resource(
            self.ctx.lro_wait(),
            None,
            || self.check_monitor(&monitor),
            label,
        )
        .await
    }

    async fn check_monitor(&self, monitor: &Monitor) -> Result<Readiness<()>, ArmError> {
        let url = match monitor {
            Monitor::AsyncOperation(url) | Monitor::Location(url) => url,
        };
        let response = self
            .send(self.ctx.http().get(url), self.ctx.management_token())
            .await?;
        let retry_after = parse_retry_after(response.headers());

        match monitor {
            Monitor::AsyncOperation(_) => {
                let body = response.text().await?;
                let status: AsyncOperationBody = serde_json::from_str(&body)
                    .map_err(|e| ArmError::InvalidResponse(e.to_string()))?;
                status.readiness(retry_after)
            }
            Monitor::Location(_) if response.status() == StatusCode::ACCEPTED => {
                Ok(Readiness::NotReady { retry_after })
            }
            Monitor::Location(_) => Ok(Readiness::Ready(())),
        }
    }

    async fn delete_resource(
        &self,
        resource_group: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), ArmError> {
        let url = self.url(&self.resource_path(resource_group, kind, name), kind);
        self.delete_and_wait(&url, &format!("{kind} '{name}'")).await
    }

    fn blob_request(&self, request: RequestBuilder) -> RequestBuilder {
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        request
            .header("x-ms-version", ResourceKind::Blob.api_version())
            .header("x-ms-date", date)
    }
}

/// Where a long-running operation reports its status
#[derive(Debug, Clone, PartialEq, Eq)]
enum Monitor {
    /// JSON body with a `status` field
    AsyncOperation(String),
    /// 202 while running, 200/204 when done
    Location(String),
}

impl Monitor {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        header(ASYNC_OPERATION)
            .map(Monitor::AsyncOperation)
            .or_else(|| header(LOCATION).map(Monitor::Location))
    }
}

/// Parse `Retry-After` given in seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn error_from_response(response: Response) -> ArmError {
    let status = response.status().as_u16();
    let header_code = response
        .headers()
        .get(ERROR_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    parse_error(status, header_code.as_deref(), &body)
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Build an [`ArmError`] from a failed response.
///
/// ARM returns `{"error": {"code", "message"}}`. The blob service returns
/// XML and repeats the code in `x-ms-error-code`; any body that is not the
/// ARM envelope is kept whole as the message.
fn parse_error(status: u16, header_code: Option<&str>, body: &str) -> ArmError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .unwrap_or_default();

    let code = detail.code.or_else(|| header_code.map(str::to_string));
    let message = detail.message.or_else(|| {
        let body = body.trim();
        (!body.is_empty()).then(|| body.to_string())
    });

    classify_arm_error(status, code.as_deref(), message.as_deref())
}

#[derive(Debug, Deserialize)]
struct AsyncOperationBody {
    status: String,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

impl AsyncOperationBody {
    fn readiness(self, retry_after: Option<Duration>) -> Result<Readiness<()>, ArmError> {
        match ProvisioningState::parse(&self.status) {
            ProvisioningState::Succeeded => Ok(Readiness::Ready(())),
            ProvisioningState::Failed | ProvisioningState::Canceled => {
                let detail = self.error.unwrap_or_default();
                let message = detail
                    .message
                    .unwrap_or_else(|| format!("Operation {}", self.status));
                // A failed operation has no HTTP status of its own
                Err(classify_arm_error(409, detail.code.as_deref(), Some(&message)))
            }
            _ => Ok(Readiness::NotReady { retry_after }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentBody {
    #[serde(default)]
    properties: DeploymentProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentProperties {
    provisioning_state: Option<String>,
    error: Option<serde_json::Value>,
}

impl From<DeploymentBody> for DeploymentStatus {
    fn from(body: DeploymentBody) -> Self {
        let state = body
            .properties
            .provisioning_state
            .as_deref()
            .map_or(ProvisioningState::Other, ProvisioningState::parse);
        DeploymentStatus {
            state,
            error: body.properties.error,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationsBody {
    #[serde(default)]
    value: Vec<OperationBody>,
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationBody {
    #[serde(default)]
    properties: OperationProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationProperties {
    target_resource: Option<TargetResourceBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetResourceBody {
    resource_type: Option<String>,
    resource_name: Option<String>,
}

impl From<OperationsBody> for OperationsPage {
    fn from(body: OperationsBody) -> Self {
        let operations = body
            .value
            .into_iter()
            .map(|op| DeploymentOperation {
                target: op.properties.target_resource.and_then(|t| {
                    Some(TargetResource {
                        resource_type: t.resource_type.filter(|s| !s.is_empty())?,
                        resource_name: t.resource_name.filter(|s| !s.is_empty())?,
                    })
                }),
            })
            .collect();
        OperationsPage {
            operations,
            next_link: body.next_link.filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualMachineBody {
    #[serde(default)]
    properties: VirtualMachineProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualMachineProperties {
    #[serde(default)]
    storage_profile: StorageProfileBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageProfileBody {
    os_disk: Option<DiskBody>,
    #[serde(default)]
    data_disks: Vec<DiskBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskBody {
    #[serde(default)]
    lun: i32,
    managed_disk: Option<IdBody>,
    vhd: Option<UriBody>,
}

#[derive(Debug, Deserialize)]
struct IdBody {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UriBody {
    uri: Option<String>,
}

impl DiskBody {
    fn source(self) -> Option<DiskSource> {
        if let Some(id) = self.managed_disk.and_then(|m| m.id) {
            return Some(DiskSource::Managed(id));
        }
        self.vhd.and_then(|v| v.uri).map(DiskSource::Vhd)
    }
}

impl From<VirtualMachineBody> for StorageProfile {
    fn from(body: VirtualMachineBody) -> Self {
        let profile = body.properties.storage_profile;
        StorageProfile {
            os_disk: profile.os_disk.and_then(DiskBody::source),
            data_disks: profile
                .data_disks
                .into_iter()
                .filter_map(|d| {
                    let lun = d.lun;
                    d.source().map(|source| DataDisk { lun, source })
                })
                .collect(),
        }
    }
}

impl ResourceGateway for ArmClient {
    #[instrument(skip(self, request), fields(deployment = %handle))]
    async fn create_deployment(
        &self,
        handle: &DeploymentHandle,
        request: &DeploymentRequest,
    ) -> Result<(), ArmError> {
        let url = self.url(&handle.path(), ResourceKind::Deployment);
        self.send(
            self.ctx.http().put(&url).json(&request.to_body()),
            self.ctx.management_token(),
        )
        .await?;
        debug!("Deployment accepted");
        Ok(())
    }

    async fn get_deployment(&self, handle: &DeploymentHandle) -> Result<DeploymentStatus, ArmError> {
        let url = self.url(&handle.path(), ResourceKind::Deployment);
        let body: DeploymentBody = self.get_json(&url).await?;
        Ok(body.into())
    }

    async fn list_deployment_operations(
        &self,
        handle: &DeploymentHandle,
        next_link: Option<&str>,
    ) -> Result<OperationsPage, ArmError> {
        let url = match next_link {
            Some(link) => link.to_string(),
            None => format!(
                "{}&$top={}",
                self.url(
                    &format!("{}/operations", handle.path()),
                    ResourceKind::Deployment
                ),
                DEPLOYMENT_OPERATIONS_PAGE_SIZE
            ),
        };
        let body: OperationsBody = self.get_json(&url).await?;
        Ok(body.into())
    }

    async fn delete_deployment(&self, handle: &DeploymentHandle) -> Result<(), ArmError> {
        let url = self.url(&handle.path(), ResourceKind::Deployment);
        self.delete_and_wait(&url, &format!("deployment '{}'", handle.deployment_name))
            .await
    }

    async fn get_virtual_machine_storage(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageProfile, ArmError> {
        let kind = ResourceKind::VirtualMachine;
        let url = self.url(&self.resource_path(resource_group, kind, name), kind);
        let body: VirtualMachineBody = self.get_json(&url).await?;
        Ok(body.into())
    }

    async fn delete_virtual_machine(&self, resource_group: &str, name: &str) -> Result<(), ArmError> {
        self.delete_resource(resource_group, ResourceKind::VirtualMachine, name)
            .await
    }

    async fn delete_network_interface(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), ArmError> {
        self.delete_resource(resource_group, ResourceKind::NetworkInterface, name)
            .await
    }

    async fn delete_virtual_network(&self, resource_group: &str, name: &str) -> Result<(), ArmError> {
        self.delete_resource(resource_group, ResourceKind::VirtualNetwork, name)
            .await
    }

    async fn delete_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), ArmError> {
        self.delete_resource(resource_group, ResourceKind::NetworkSecurityGroup, name)
            .await
    }

    async fn delete_public_ip_address(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), ArmError> {
        self.delete_resource(resource_group, ResourceKind::PublicIpAddress, name)
            .await
    }

    async fn delete_key_vault(&self, resource_group: &str, name: &str) -> Result<(), ArmError> {
        self.delete_resource(resource_group, ResourceKind::KeyVault, name)
            .await
    }

    async fn delete_managed_disk(&self, disk: &ManagedDiskId) -> Result<(), ArmError> {
        let url = self.url(&disk.path(), ResourceKind::ManagedDisk);
        self.delete_and_wait(&url, &format!("disk '{}'", disk.name))
            .await
    }

    async fn break_blob_lease(&self, blob: &BlobLocation) -> Result<(), ArmError> {
        let url = format!("{}?comp=lease", blob.url);
        let request = self
            .blob_request(self.ctx.http().put(&url))
            .header("x-ms-lease-action", "break")
            .header(CONTENT_LENGTH, "0");
        self.send(request, self.ctx.storage_token()).await?;
        debug!(blob = %blob, "Lease broken");
        Ok(())
    }

    async fn delete_blob(&self, blob: &BlobLocation) -> Result<(), ArmError> {
        let request = self
            .blob_request(self.ctx.http().delete(&blob.url))
            .header("x-ms-delete-snapshots", "include");
        self.send(request, self.ctx.storage_token()).await?;
        Ok(())
    }
}
