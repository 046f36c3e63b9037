//! Template submission and provisioning-state polling

use crate::arm::{DeploymentHandle, DeploymentRequest, DeploymentStatus, ProvisioningState, ResourceGateway};
use crate::progress::Reporter;
use crate::wait::{Readiness, WaitConfig, wait_for_resource};
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Submits a deployment and waits for ARM to realize it
pub struct DeploymentSubmitter<G> {
    gateway: Arc<G>,
    poll: WaitConfig,
    reporter: Arc<dyn Reporter>,
}

impl<G: ResourceGateway> DeploymentSubmitter<G> {
    /// Poll until a terminal state or `timeout`
    pub fn new(gateway: Arc<G>, timeout: Duration, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            gateway,
            poll: WaitConfig {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(30),
                timeout,
                jitter: true,
            },
            reporter,
        }
    }

    /// Override polling delays
    pub fn with_poll_config(mut self, poll: WaitConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Submit `request` under `handle` and wait for it to succeed.
    ///
    /// Fails if ARM rejects the submission, the deployment ends `Failed` or
    /// `Canceled`, the timeout elapses, or `cancel` fires.
    pub async fn deploy(
        &self,
        handle: &DeploymentHandle,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(deployment = %handle, "Submitting deployment");
        self.reporter
            .progress(&format!("Starting deployment {}", handle.deployment_name));

        self.gateway
            .create_deployment(handle, request)
            .await
            .with_context(|| format!("Failed to submit deployment {handle}"))?;

        self.reporter.progress("Waiting for deployment to complete");
        let status = wait_for_resource(
            &self.poll,
            Some(cancel),
            || self.check(handle),
            &handle.deployment_name,
        )
        .await
        .with_context(|| format!("Deployment {handle} did not complete"))?;

        match status.state {
            ProvisioningState::Succeeded => {
                info!(deployment = %handle, "Deployment succeeded");
                self.reporter.progress("Deployment succeeded");
                Ok(())
            }
            state => {
                let detail = status
                    .error
                    .map(|e| format!(": {e}"))
                    .unwrap_or_default();
                bail!("Deployment {handle} ended in state {state}{detail}")
            }
        }
    }

    async fn check(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<Readiness<DeploymentStatus>, crate::arm::ArmError> {
        match self.gateway.get_deployment(handle).await {
            Ok(status) if status.state.is_terminal() => Ok(Readiness::Ready(status)),
            Ok(status) => {
                info!(deployment = %handle, state = %status.state, "Deployment in progress");
                Ok(Readiness::not_ready())
            }
            Err(e) if e.is_retryable() => {
                warn!(deployment = %handle, error = %e, "Transient error polling deployment");
                Ok(Readiness::not_ready())
            }
            Err(e) => Err(e),
        }
    }
}
