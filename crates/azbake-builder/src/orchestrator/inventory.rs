//! Discovery of the resources a deployment created
//!
//! The deployment's operation log is the source of truth: every operation
//! that targeted a resource names its provider type and name.

use crate::arm::{ArmError, DeploymentHandle, ResourceDescriptor, ResourceGateway};
use crate::retry::RetryExecutor;
use azbake_common::ResourceKind;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// List the resources `handle` created, in first-seen order without duplicates.
///
/// Each page is fetched under `retry`. A deployment that does not exist
/// yields an empty list: nothing was created.
pub async fn list_created_resources<G: ResourceGateway>(
    gateway: &G,
    handle: &DeploymentHandle,
    retry: &RetryExecutor,
    cancel: &CancellationToken,
) -> Result<Vec<ResourceDescriptor>, ArmError> {
    let mut resources = Vec::new();
    let mut seen: HashSet<(ResourceKind, String)> = HashSet::new();
    let mut next_link: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let label = format!("operations of deployment '{}' (page {pages})", handle.deployment_name);
        let page = retry
            .fetch(&label, cancel, || {
                gateway.list_deployment_operations(handle, next_link.as_deref())
            })
            .await?;
        let page = match page {
            Some(page) => page,
            None if pages == 0 => {
                info!(deployment = %handle, "Deployment not found, nothing to clean up");
                return Ok(Vec::new());
            }
            None => {
                return Err(ArmError::NotFound {
                    resource: format!("deployment {handle} while listing operations"),
                });
            }
        };
        pages += 1;

        for operation in page.operations {
            let Some(target) = operation.target else {
                continue;
            };
            let Some(kind) = ResourceKind::from_provider_type(&target.resource_type) else {
                debug!(
                    resource_type = %target.resource_type,
                    name = %target.resource_name,
                    "Skipping resource type that is removed with its parent"
                );
                continue;
            };
            if kind == ResourceKind::Deployment
                && target
                    .resource_name
                    .eq_ignore_ascii_case(&handle.deployment_name)
            {
                continue;
            }
            if seen.insert((kind, target.resource_name.to_ascii_lowercase())) {
                resources.push(ResourceDescriptor::new(
                    kind,
                    target.resource_name,
                    &handle.resource_group,
                ));
            }
        }

        match page.next_link {
            Some(link) if next_link.as_deref() == Some(link.as_str()) => {
                warn!(deployment = %handle, link = %link, "Operation list repeats its next link, stopping");
                break;
            }
            Some(link) => next_link = Some(link),
            None => break,
        }
    }

    info!(
        deployment = %handle,
        pages,
        count = resources.len(),
        "Listed resources created by deployment"
    );
    Ok(resources)
}
