//! azbake: builds a VM from an ARM template and cleans up after it
//!
//! `build` deploys the template, then deletes everything the deployment
//! created. `cleanup` re-runs the teardown for a deployment left behind by
//! an interrupted build.

use anyhow::{Context, Result, bail};
use azbake_builder::arm::{ArmClient, ArmContext, DeploymentHandle};
use azbake_builder::config::BuildConfig;
use azbake_builder::orchestrator::{
    BuildContext, CleanupReport, DeployTemplateStep, DiskFlags, ForeignResources, Pipeline,
    StepAction, TeardownPlan, clean_up_deployment, list_created_resources,
};
use azbake_builder::progress::{LogReporter, Reporter};
use azbake_builder::retry::{RetryExecutor, RetryPolicy};
use azbake_common::defaults::{DEFAULT_ARM_ENDPOINT, DEFAULT_DELETE_ATTEMPT_TIMEOUT_SECS};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "azbake")]
#[command(about = "Build VM images from ARM templates and tear down what they create")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Credentials shared by every subcommand
#[derive(clap::Args, Debug)]
struct AuthArgs {
    /// Bearer token for the ARM management plane
    #[arg(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    /// Bearer token for blob storage (defaults to the management token)
    #[arg(long, env = "AZURE_STORAGE_TOKEN", hide_env_values = true)]
    storage_token: Option<String>,
}

/// Arguments for the build command (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Build configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Deployment name (overrides the config; generated when absent)
    #[arg(long)]
    deployment_name: Option<String>,

    /// Keep the OS disk as the build artifact
    #[arg(long)]
    keep_disk: bool,

    /// Print the cleanup report as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    auth: AuthArgs,
}

/// Arguments for the cleanup command
#[derive(clap::Args, Debug)]
struct CleanupArgs {
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    subscription: String,

    #[arg(long)]
    resource_group: String,

    /// Deployment whose resources should be deleted
    #[arg(long)]
    deployment: String,

    /// ARM management endpoint
    #[arg(long, default_value = DEFAULT_ARM_ENDPOINT)]
    endpoint: String,

    /// Keep the OS disk
    #[arg(long)]
    keep_disk: bool,

    /// Existing security group the deployment referenced (never deleted)
    #[arg(long)]
    foreign_security_group: Option<String>,

    /// Existing virtual network the deployment referenced (never deleted)
    #[arg(long)]
    foreign_virtual_network: Option<String>,

    /// Existing key vault the deployment referenced (never deleted)
    #[arg(long)]
    foreign_key_vault: Option<String>,

    /// Maximum delete attempts per resource
    #[arg(long, default_value_t = RetryPolicy::default().max_attempts)]
    max_attempts: u32,

    /// Show what would be deleted without deleting
    #[arg(long)]
    dry_run: bool,

    /// Print the cleanup report as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    auth: AuthArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the template, run the build, and clean up
    Build(Box<BuildArgs>),

    /// Delete the resources of an existing deployment
    Cleanup(Box<CleanupArgs>),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match args.command {
        Command::Build(build_args) => handle_build(*build_args).await,
        Command::Cleanup(cleanup_args) => handle_cleanup(*cleanup_args).await,
    }
}

fn arm_context(endpoint: &str, auth: &AuthArgs) -> Result<ArmContext> {
    let mut ctx = ArmContext::new(endpoint, &auth.access_token)
        .context("Failed to create HTTP client")?;
    if let Some(token) = &auth.storage_token {
        ctx = ctx.with_storage_token(token);
    }
    Ok(ctx)
}

/// First Ctrl-C stops the build, the second one aborts cleanup
fn spawn_interrupt_handler(build: CancellationToken, cleanup: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping build. Press Ctrl-C again to abort cleanup");
            build.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted again, aborting cleanup");
            cleanup.cancel();
        }
    });
}

fn print_report(report: &CleanupReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for line in report.summary() {
            println!("{line}");
        }
    }
    Ok(())
}

fn check_report(report: &CleanupReport) -> Result<()> {
    if let Some(reason) = &report.aborted {
        bail!("Cleanup of {} aborted: {reason}", report.deployment);
    }
    let failed = report.failures().count();
    if failed > 0 {
        bail!(
            "Cleanup of {} left {failed} resource(s) behind",
            report.deployment
        );
    }
    Ok(())
}

/// Handle the build command
async fn handle_build(args: BuildArgs) -> Result<()> {
    let mut config = BuildConfig::load(&args.config)?;
    if let Some(name) = args.deployment_name {
        config.arm.deployment_name = Some(name);
    }
    if args.keep_disk {
        config.disk.keep_disk = true;
    }

    let request = config.deployment_request()?;
    let handle = config.deployment_handle();
    info!(
        deployment = %handle.deployment_name,
        resource_group = %handle.resource_group,
        keep_disk = config.disk.keep_disk,
        "Starting build"
    );

    let arm = arm_context(&config.arm.endpoint, &args.auth)?;
    let gateway = Arc::new(ArmClient::from_context(&arm, &config.arm.subscription_id));
    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter::new());

    let build_cancel = CancellationToken::new();
    let cleanup_cancel = CancellationToken::new();
    spawn_interrupt_handler(build_cancel.clone(), cleanup_cancel.clone());

    let step = DeployTemplateStep::new(gateway, request)
        .with_deploy_timeout(config.timeouts.deploy())
        .with_retry(config.retry.clone(), config.timeouts.delete_attempt())
        .with_cleanup_cancellation(cleanup_cancel);
    let pipeline = Pipeline::new().step(step);

    let mut ctx = BuildContext::new(handle, reporter)
        .with_disk_flags(config.disk_flags())
        .with_foreign(config.foreign_resources());

    let action = pipeline.run(&mut ctx, &build_cancel).await;

    if let Some(report) = &ctx.report {
        print_report(report, args.json)?;
    }

    if action == StepAction::Halt {
        let reason = ctx.error.as_deref().unwrap_or("interrupted");
        bail!("Build {} failed: {reason}", ctx.handle.deployment_name);
    }
    if let Some(report) = &ctx.report {
        check_report(report).context("Build succeeded but cleanup was incomplete")?;
    }
    if let Some(artifact) = ctx.artifact() {
        println!("Artifact: {artifact}");
    }
    Ok(())
}

/// Handle the cleanup command
async fn handle_cleanup(args: CleanupArgs) -> Result<()> {
    let handle = DeploymentHandle::new(&args.subscription, &args.resource_group, &args.deployment);
    let arm = arm_context(&args.endpoint, &args.auth)?;
    let gateway = Arc::new(ArmClient::from_context(&arm, &args.subscription));
    let foreign = ForeignResources {
        security_group: args.foreign_security_group,
        virtual_network: args.foreign_virtual_network,
        key_vault: args.foreign_key_vault,
    };

    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter::new());
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone(), cancel.clone());

    let policy = RetryPolicy {
        max_attempts: args.max_attempts,
        ..RetryPolicy::default()
    };
    let retry = RetryExecutor::new(policy, Arc::clone(&reporter))
        .with_attempt_timeout(Duration::from_secs(DEFAULT_DELETE_ATTEMPT_TIMEOUT_SECS));

    if args.dry_run {
        let inventory = list_created_resources(gateway.as_ref(), &handle, &retry, &cancel)
            .await
            .with_context(|| format!("Failed to list resources of deployment {handle}"))?;
        let plan = TeardownPlan::build(inventory, &foreign);
        if plan.is_empty() {
            println!("Deployment {handle} has no resources to delete.");
        } else {
            println!("Would delete (dry run):");
            for line in plan.describe() {
                println!("  {line}");
            }
        }
        println!("  then deployment '{}'", handle.deployment_name);
        return Ok(());
    }

    let mut ctx = BuildContext::new(handle, reporter)
        .with_disk_flags(DiskFlags {
            keep_disk: args.keep_disk,
            ..Default::default()
        })
        .with_foreign(foreign);

    clean_up_deployment(&gateway, &mut ctx, retry, cancel).await;

    let Some(report) = &ctx.report else {
        return Ok(());
    };
    print_report(report, args.json)?;
    check_report(report)
}
