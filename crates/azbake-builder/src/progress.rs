//! Progress reporting for builds and cleanup
//!
//! Every deletion attempt, retry and terminal outcome is reported through a
//! [`Reporter`], so the same orchestration code can feed a log, a UI, or a
//! test recorder.

use tracing::{error, info};

/// Sink for operator-facing progress and error messages
#[cfg_attr(test, mockall::automock)]
pub trait Reporter: Send + Sync {
    /// Report progress
    fn progress(&self, message: &str);

    /// Report an error the operator should look at
    fn error(&self, message: &str);
}

/// Reporter that writes to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for LogReporter {
    fn progress(&self, message: &str) {
        info!(target: "azbake::ui", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "azbake::ui", "{message}");
    }
}
