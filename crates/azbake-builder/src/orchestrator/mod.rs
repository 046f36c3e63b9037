//! Build orchestration
//!
//! This module provides:
//! - `deploy`: template submission and polling
//! - `inventory`: what a deployment created
//! - `teardown`: dependency-ordered deletion of that inventory
//! - `disk`: what happens to the build VM's disks
//! - `step`: the pipeline step that ties deployment and cleanup together

pub mod context;
pub mod deleters;
pub mod deploy;
pub mod disk;
pub mod inventory;
pub mod report;
pub mod step;
pub mod teardown;

pub use context::BuildContext;
pub use deleters::{Deletable, DeleterTable};
pub use deploy::DeploymentSubmitter;
pub use disk::{
    DiskDisposer, DiskFlags, DiskKind, DiskPlan, DiskReference, DiskRole, UnresolvedDisks,
    resolve_disk_plan,
};
pub use inventory::list_created_resources;
pub use report::{CleanupReport, CleanupResult, Outcome};
pub use step::{DeployTemplateStep, Pipeline, Step, StepAction, clean_up_deployment};
pub use teardown::{ForeignResources, TeardownCoordinator, TeardownPlan};
