//! Build configuration
//!
//! A build is described by a JSON file split into focused sub-configs.
//! Command-line flags override individual fields after loading.

use crate::arm::{DeploymentHandle, DeploymentRequest};
use crate::orchestrator::{DiskFlags, ForeignResources};
use crate::retry::RetryPolicy;
use anyhow::{Context, Result, bail};
use azbake_common::defaults::{
    DEPLOYMENT_NAME_PREFIX, default_arm_endpoint, default_delete_attempt_timeout_secs,
    default_deploy_timeout_secs,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where and what to deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConfig {
    /// Management endpoint
    #[serde(default = "default_arm_endpoint")]
    pub endpoint: String,
    pub subscription_id: String,
    pub resource_group: String,
    /// Injected as the `location` template parameter when set
    #[serde(default)]
    pub location: Option<String>,
    /// Generated as `azbake-<uuid>` when absent
    #[serde(default)]
    pub deployment_name: Option<String>,
    /// Template file, relative to the config file
    pub template: PathBuf,
    /// Parameters file in ARM parameter-file or plain `{"name": {"value": ...}}` form
    #[serde(default)]
    pub parameters: Option<PathBuf>,
}

/// What happens to the build VM's disks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Keep the OS disk as the build artifact
    pub keep_disk: bool,
    /// The VM uses managed disks
    pub managed: bool,
    /// The VM was created from a shared image catalog
    pub catalog_sourced: bool,
}

/// Storage account for unmanaged (VHD) builds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Injected as the `storageAccountName` template parameter
    pub account: Option<String>,
    /// Injected as the `storageContainerName` template parameter
    pub container: Option<String>,
}

/// Pre-existing resources the template references but does not own
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForeignConfig {
    pub security_group: Option<String>,
    pub virtual_network: Option<String>,
    pub key_vault: Option<String>,
}

/// Timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Whole deployment, submit to terminal state
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_secs: u64,
    /// One delete attempt
    #[serde(default = "default_delete_attempt_timeout_secs")]
    pub delete_attempt_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            deploy_secs: default_deploy_timeout_secs(),
            delete_attempt_secs: default_delete_attempt_timeout_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn deploy(&self) -> Duration {
        Duration::from_secs(self.deploy_secs)
    }

    pub fn delete_attempt(&self) -> Duration {
        Duration::from_secs(self.delete_attempt_secs)
    }
}

/// Configuration for one build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub arm: ArmConfig,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub foreign: ForeignConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl BuildConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: BuildConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.arm.subscription_id.trim().is_empty() {
            bail!("arm.subscription_id must not be empty");
        }
        if self.arm.resource_group.trim().is_empty() {
            bail!("arm.resource_group must not be empty");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.multiplier < 1.0 {
            bail!("retry.multiplier must be at least 1.0");
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            bail!("retry.initial_backoff_ms must not exceed retry.max_backoff_ms");
        }
        if self.timeouts.deploy_secs == 0 || self.timeouts.delete_attempt_secs == 0 {
            bail!("timeouts must be greater than zero");
        }
        Ok(())
    }

    /// Fill in the deployment name if the config left it out
    pub fn resolve_deployment_name(&mut self) -> &str {
        self.arm
            .deployment_name
            .get_or_insert_with(generate_deployment_name)
    }

    /// Handle for this build's deployment, generating a name if needed
    pub fn deployment_handle(&mut self) -> DeploymentHandle {
        let name = self.resolve_deployment_name().to_string();
        DeploymentHandle::new(&self.arm.subscription_id, &self.arm.resource_group, name)
    }

    pub fn disk_flags(&self) -> DiskFlags {
        DiskFlags {
            managed_build: self.disk.managed,
            catalog_sourced: self.disk.catalog_sourced,
            keep_disk: self.disk.keep_disk,
            already_disposed: false,
        }
    }

    pub fn foreign_resources(&self) -> ForeignResources {
        ForeignResources {
            security_group: self.foreign.security_group.clone(),
            virtual_network: self.foreign.virtual_network.clone(),
            key_vault: self.foreign.key_vault.clone(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Read the template and parameters from disk
    pub fn deployment_request(&self) -> Result<DeploymentRequest> {
        let template_path = self.resolve(&self.arm.template);
        let template = read_json(&template_path)?;

        let mut parameters = match &self.arm.parameters {
            Some(path) => {
                let value = read_json(&self.resolve(path))?;
                // Accept full ARM parameter files as well as the bare map
                if value.get("$schema").is_some() {
                    value
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({}))
                } else {
                    value
                }
            }
            None => serde_json::json!({}),
        };

        let injected = [
            ("location", &self.arm.location),
            ("storageAccountName", &self.storage.account),
            ("storageContainerName", &self.storage.container),
        ];
        if let Some(map) = parameters.as_object_mut() {
            for (name, value) in injected {
                if let Some(value) = value {
                    map.entry(name)
                        .or_insert_with(|| serde_json::json!({ "value": value }));
                }
            }
        } else {
            bail!("Template parameters must be a JSON object");
        }

        Ok(DeploymentRequest {
            template,
            parameters,
        })
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// `azbake-<uuid>` with the simple (dashless) uuid form
pub fn generate_deployment_name() -> String {
    format!("{DEPLOYMENT_NAME_PREFIX}-{}", uuid::Uuid::new_v4().simple())
}
