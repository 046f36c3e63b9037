//! Cleanup outcomes and the report handed back to the operator

use super::disk::DiskReference;
use crate::retry::{AttemptOutcome, Completion};
use azbake_common::ResourceKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of a single resource cleanup operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CleanupResult {
    /// Resource was successfully deleted
    Deleted,
    /// Resource was already deleted (not found)
    AlreadyDeleted,
    /// Resource was intentionally left in place
    Kept,
    /// Nothing to do (not owned, or consumed upstream)
    Skipped,
    /// Cleanup failed with error
    Failed,
}

/// What happened to one resource
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub kind: ResourceKind,
    pub name: String,
    pub result: CleanupResult,
    pub error: Option<String>,
    pub attempts: u32,
}

impl Outcome {
    pub fn new(kind: ResourceKind, name: impl Into<String>, result: CleanupResult) -> Self {
        Self {
            kind,
            name: name.into(),
            result,
            error: None,
            attempts: 0,
        }
    }

    pub fn failed(kind: ResourceKind, name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(kind, name, CleanupResult::Failed)
        }
    }

    /// Outcome of a deletion driven by the retry executor
    pub fn from_attempt(kind: ResourceKind, name: impl Into<String>, attempt: AttemptOutcome) -> Self {
        let mut outcome = match attempt.result {
            Ok(Completion::Done) => Self::new(kind, name, CleanupResult::Deleted),
            Ok(Completion::AlreadyGone) => Self::new(kind, name, CleanupResult::AlreadyDeleted),
            Err(e) => Self::failed(kind, name, e),
        };
        outcome.attempts = attempt.attempts;
        outcome
    }

    pub fn succeeded(&self) -> bool {
        self.result != CleanupResult::Failed
    }
}

/// Ordered record of a teardown
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub deployment: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<Outcome>,
    /// Disk left behind as the build's output
    pub artifact: Option<DiskReference>,
    /// Set when cleanup could not run at all
    pub aborted: Option<String>,
}

impl CleanupReport {
    pub fn new(deployment: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
            artifact: None,
            aborted: None,
        }
    }

    pub fn push(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    /// No failures and cleanup was not aborted
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.failures().next().is_none()
    }

    pub fn count(&self, result: CleanupResult) -> usize {
        self.outcomes.iter().filter(|o| o.result == result).count()
    }

    /// Find the outcome for a resource
    pub fn outcome(&self, kind: ResourceKind, name: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.kind == kind && o.name.eq_ignore_ascii_case(name))
    }

    /// Human-readable lines for the terminal
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!("Cleanup of deployment {}:", self.deployment)];

        if let Some(reason) = &self.aborted {
            lines.push(format!("  aborted: {reason}"));
        }

        for o in &self.outcomes {
            let mut line = format!("  {:<16} {:<40} {}", o.kind.to_string(), o.name, o.result);
            if o.attempts > 1 {
                line.push_str(&format!(" ({} attempts)", o.attempts));
            }
            if let Some(error) = &o.error {
                line.push_str(&format!(": {error}"));
            }
            lines.push(line);
        }

        lines.push(format!(
            "  {} deleted, {} already gone, {} kept, {} skipped, {} failed",
            self.count(CleanupResult::Deleted),
            self.count(CleanupResult::AlreadyDeleted),
            self.count(CleanupResult::Kept),
            self.count(CleanupResult::Skipped),
            self.count(CleanupResult::Failed),
        ));

        if let Some(artifact) = &self.artifact {
            lines.push(format!("  artifact: {artifact}"));
        }

        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            lines.push("  delete these manually:".to_string());
            for o in failures {
                lines.push(format!("    {} '{}'", o.kind, o.name));
            }
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::ArmError;

    #[test]
    fn outcome_from_attempts() {
        let deleted = Outcome::from_attempt(
            ResourceKind::VirtualMachine,
            "vm",
            AttemptOutcome {
                attempts: 2,
                result: Ok(Completion::Done),
            },
        );
        assert_eq!(deleted.result, CleanupResult::Deleted);
        assert_eq!(deleted.attempts, 2);

        let gone = Outcome::from_attempt(
            ResourceKind::VirtualMachine,
            "vm",
            AttemptOutcome {
                attempts: 1,
                result: Ok(Completion::AlreadyGone),
            },
        );
        assert_eq!(gone.result, CleanupResult::AlreadyDeleted);
        assert!(gone.succeeded());

        let failed = Outcome::from_attempt(
            ResourceKind::NetworkInterface,
            "nic",
            AttemptOutcome {
                attempts: 5,
                result: Err(ArmError::Throttled),
            },
        );
        assert!(!failed.succeeded());
        assert_eq!(failed.error.as_deref(), Some("Rate limit exceeded"));
    }

    #[test]
    fn summary_lists_manual_remediation() {
        let mut report = CleanupReport::new("rg/azbake-1");
        report.push(Outcome::new(ResourceKind::VirtualMachine, "vm", CleanupResult::Deleted));
        report.push(Outcome::failed(ResourceKind::KeyVault, "kv-1", "forbidden"));
        report.finish();

        assert!(!report.is_clean());
        let summary = report.summary().join("\n");
        assert!(summary.contains("1 deleted"));
        assert!(summary.contains("1 failed"));
        assert!(summary.contains("delete these manually"));
        assert!(summary.contains("key-vault 'kv-1'"));
    }

    #[test]
    fn aborted_report_is_not_clean() {
        let mut report = CleanupReport::new("rg/azbake-1");
        assert!(report.is_clean());
        report.aborted = Some("inventory unavailable".into());
        assert!(!report.is_clean());
    }

    #[test]
    fn report_serializes_to_json() {
        let mut report = CleanupReport::new("rg/d");
        report.push(Outcome::new(ResourceKind::PublicIpAddress, "pip", CleanupResult::Skipped));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["kind"], "public-ip-address");
        assert_eq!(json["outcomes"][0]["result"], "skipped");
    }
}
