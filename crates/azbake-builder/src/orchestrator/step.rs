//! Build pipeline steps
//!
//! A step either lets the pipeline continue or halts it. Whatever happened,
//! every step that ran gets its `cleanup` called, in reverse order.

use super::context::BuildContext;
use super::deploy::DeploymentSubmitter;
use super::inventory::list_created_resources;
use super::report::CleanupReport;
use super::teardown::TeardownCoordinator;
use crate::arm::{DeploymentRequest, ResourceGateway};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::wait::WaitConfig;
use azbake_common::defaults::{DEFAULT_DELETE_ATTEMPT_TIMEOUT_SECS, DEFAULT_DEPLOY_TIMEOUT_SECS};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What the pipeline does after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StepAction {
    Continue,
    Halt,
}

/// One unit of a build
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(
        &'a self,
        ctx: &'a mut BuildContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, StepAction>;

    /// Undo what `run` did. Must not fail.
    fn cleanup<'a>(&'a self, ctx: &'a mut BuildContext) -> BoxFuture<'a, ()>;
}

/// Ordered list of steps
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Run steps until one halts, then clean up every step that ran.
    pub async fn run(&self, ctx: &mut BuildContext, cancel: &CancellationToken) -> StepAction {
        let mut ran = 0;
        let mut action = StepAction::Continue;

        for step in &self.steps {
            if cancel.is_cancelled() {
                warn!(step = step.name(), "Cancelled before step");
                action = StepAction::Halt;
                break;
            }
            ran += 1;
            info!(step = step.name(), "Running step");
            action = step.run(ctx, cancel).await;
            if action == StepAction::Halt {
                warn!(step = step.name(), "Step halted the build");
                break;
            }
        }

        for step in self.steps[..ran].iter().rev() {
            info!(step = step.name(), "Cleaning up step");
            step.cleanup(ctx).await;
        }

        action
    }
}

/// Deploys the build template; its cleanup tears the deployment down.
pub struct DeployTemplateStep<G> {
    gateway: Arc<G>,
    request: DeploymentRequest,
    deploy_timeout: Duration,
    poll: Option<WaitConfig>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    cleanup_cancel: CancellationToken,
}

impl<G: ResourceGateway + 'static> DeployTemplateStep<G> {
    pub fn new(gateway: Arc<G>, request: DeploymentRequest) -> Self {
        Self {
            gateway,
            request,
            deploy_timeout: Duration::from_secs(DEFAULT_DEPLOY_TIMEOUT_SECS),
            poll: None,
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(DEFAULT_DELETE_ATTEMPT_TIMEOUT_SECS),
            cleanup_cancel: CancellationToken::new(),
        }
    }

    pub fn with_deploy_timeout(mut self, timeout: Duration) -> Self {
        self.deploy_timeout = timeout;
        self
    }

    /// Override deployment polling delays (the timeout still comes from
    /// [`Self::with_deploy_timeout`])
    pub fn with_poll_config(mut self, poll: WaitConfig) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        self.retry = policy;
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Token that aborts cleanup; the build's own token does not
    pub fn with_cleanup_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cleanup_cancel = cancel;
        self
    }

    async fn deploy(&self, ctx: &mut BuildContext, cancel: &CancellationToken) -> StepAction {
        let mut submitter =
            DeploymentSubmitter::new(Arc::clone(&self.gateway), self.deploy_timeout, Arc::clone(&ctx.reporter));
        if let Some(poll) = &self.poll {
            submitter = submitter.with_poll_config(WaitConfig {
                timeout: self.deploy_timeout,
                ..poll.clone()
            });
        }

        match submitter.deploy(&ctx.handle, &self.request, cancel).await {
            Ok(()) => StepAction::Continue,
            Err(e) => {
                error!(deployment = %ctx.handle, error = ?e, "Deployment failed");
                let message = format!("{e:#}");
                ctx.reporter.error(&message);
                ctx.error = Some(message);
                StepAction::Halt
            }
        }
    }
}

impl<G: ResourceGateway + 'static> Step for DeployTemplateStep<G> {
    fn name(&self) -> &str {
        "deploy-template"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut BuildContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, StepAction> {
        self.deploy(ctx, cancel).boxed()
    }

    fn cleanup<'a>(&'a self, ctx: &'a mut BuildContext) -> BoxFuture<'a, ()> {
        async move {
            let retry = RetryExecutor::new(self.retry.clone(), Arc::clone(&ctx.reporter))
                .with_attempt_timeout(self.attempt_timeout);
            clean_up_deployment(&self.gateway, ctx, retry, self.cleanup_cancel.clone()).await;
        }
        .boxed()
    }
}

/// Tear down everything the context's deployment created.
///
/// Stores the report in `ctx.report`. If the deployment's resources cannot
/// be listed nothing is deleted and the report says what to remove by hand.
pub async fn clean_up_deployment<G: ResourceGateway + 'static>(
    gateway: &Arc<G>,
    ctx: &mut BuildContext,
    retry: RetryExecutor,
    cancel: CancellationToken,
) {
    let reporter = Arc::clone(&ctx.reporter);
    reporter.progress(&format!(
        "Removing resources created by deployment {}",
        ctx.handle.deployment_name
    ));

    let listed = list_created_resources(gateway.as_ref(), &ctx.handle, &retry, &cancel).await;
    let inventory = match listed {
        Ok(inventory) => inventory,
        Err(e) => {
            let message = format!(
                "Could not list resources created by the deployment ({e}). \
                 Delete them manually: resource group '{}', deployment '{}'",
                ctx.handle.resource_group, ctx.handle.deployment_name
            );
            error!(deployment = %ctx.handle, error = %e, "Aborting cleanup");
            reporter.error(&message);
            let mut report = CleanupReport::new(ctx.handle.to_string());
            report.aborted = Some(message);
            report.finish();
            ctx.report = Some(report);
            return;
        }
    };

    let disks = ctx
        .disk_plan(gateway.as_ref(), &inventory, &retry, &cancel)
        .await
        .clone();
    let coordinator =
        TeardownCoordinator::new(Arc::clone(gateway), retry, reporter).with_cancellation(cancel);
    let report = coordinator
        .teardown(&ctx.handle, inventory, &ctx.foreign, &disks)
        .await;
    ctx.report = Some(report);
}
