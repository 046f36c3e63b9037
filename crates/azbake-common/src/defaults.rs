//! Default configuration values shared across azbake crates

/// Default ARM management endpoint
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// Page size used when listing deployment operations
pub const DEPLOYMENT_OPERATIONS_PAGE_SIZE: u32 = 50;

/// Default budget for a template deployment to reach a terminal state (1 hour)
pub const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 3600;

/// Default budget for a single delete attempt, including LRO polling (15 minutes)
pub const DEFAULT_DELETE_ATTEMPT_TIMEOUT_SECS: u64 = 900;

/// Default number of delete attempts per resource
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the second delete attempt
pub const DEFAULT_RETRY_INITIAL_BACKOFF_SECS: u64 = 10;

/// Default cap on the delay between delete attempts
pub const DEFAULT_RETRY_MAX_BACKOFF_SECS: u64 = 600;

/// Default growth factor between delete attempts
pub const DEFAULT_RETRY_MULTIPLIER: f32 = 2.0;

/// Prefix for generated deployment names
pub const DEPLOYMENT_NAME_PREFIX: &str = "azbake";

// Serde default functions for struct field defaults

pub fn default_arm_endpoint() -> String {
    DEFAULT_ARM_ENDPOINT.to_string()
}

pub fn default_deploy_timeout_secs() -> u64 {
    DEFAULT_DEPLOY_TIMEOUT_SECS
}

pub fn default_delete_attempt_timeout_secs() -> u64 {
    DEFAULT_DELETE_ATTEMPT_TIMEOUT_SECS
}
