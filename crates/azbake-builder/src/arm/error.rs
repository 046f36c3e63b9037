//! ARM error classification and handling
//!
//! Every gateway call returns a typed [`ArmError`]. Classification uses the
//! HTTP status plus the ARM (`error.code`) or storage (`x-ms-error-code`)
//! error code rather than matching on message text.

use thiserror::Error;

/// ARM error categories for retry and cleanup logic
#[derive(Debug, Clone, Error)]
pub enum ArmError {
    /// Resource was not found (deletion is already done)
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource is still attached to or referenced by another resource (retryable)
    #[error("Resource is still in use: {message}")]
    InUse { message: String },

    /// Break-lease on a blob that holds no lease (expected steady state)
    #[error("No lease present on blob")]
    LeaseNotPresent,

    /// Conflicting operation in progress on the resource (retryable)
    #[error("Conflicting operation in progress: {message}")]
    Conflict { message: String },

    /// A single call exceeded its time budget
    #[error("Operation timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The enclosing operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Request never produced an HTTP response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Generic ARM error with status, code and message
    #[error("ARM error ({status} {}): {message}", .code.as_deref().unwrap_or("-"))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl ArmError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArmError::NotFound { .. })
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ArmError::Cancelled)
    }

    /// Check if this error is expected to clear up on its own
    pub fn is_retryable(&self) -> bool {
        match self {
            ArmError::Throttled
            | ArmError::InUse { .. }
            | ArmError::Conflict { .. }
            | ArmError::Timeout { .. }
            | ArmError::Transport(_) => true,
            ArmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ArmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ArmError::Timeout { secs: 0 }
        } else if e.is_decode() {
            ArmError::InvalidResponse(e.to_string())
        } else {
            ArmError::Transport(e.to_string())
        }
    }
}

/// Known ARM and storage error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFound",
    "NotFound",
    "ResourceGroupNotFound",
    "DeploymentNotFound",
    "ParentResourceNotFound",
    "BlobNotFound",
    "ContainerNotFound",
];

/// Known codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["TooManyRequests", "ServerBusy", "OperationPreempted"];

/// Known codes for "still attached" conditions
const IN_USE_CODES: &[&str] = &[
    "NicInUse",
    "NicReservedForAnotherVm",
    "InUseSubnetCannotBeDeleted",
    "InUseNetworkSecurityGroupCannotBeDeleted",
    "PublicIPAddressInUse",
    "PublicIPAddressCannotBeDeleted",
    "OperationNotAllowed",
];

/// Known codes for conflicting in-flight operations
const CONFLICT_CODES: &[&str] = &[
    "Conflict",
    "AnotherOperationInProgress",
    "RetryableError",
    "LeaseIdMissing",
    "LeaseIdMismatchWithBlobOperation",
];

/// Storage code for breaking a lease that does not exist
const LEASE_NOT_PRESENT_CODE: &str = "LeaseNotPresentWithLeaseOperation";

/// Classify an ARM response using the HTTP status and error code.
pub fn classify_arm_error(status: u16, code: Option<&str>, message: Option<&str>) -> ArmError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if c == LEASE_NOT_PRESENT_CODE => ArmError::LeaseNotPresent,
        Some(c) if NOT_FOUND_CODES.contains(&c) => ArmError::NotFound { resource: message },
        Some(c) if THROTTLING_CODES.contains(&c) => ArmError::Throttled,
        Some(c) if IN_USE_CODES.contains(&c) => ArmError::InUse { message },
        Some(c) if CONFLICT_CODES.contains(&c) => ArmError::Conflict { message },
        _ => match status {
            404 => ArmError::NotFound { resource: message },
            429 => ArmError::Throttled,
            409 => ArmError::Conflict { message },
            _ => ArmError::Api {
                status,
                code: code.map(|s| s.to_string()),
                message,
            },
        },
    }
}
