//! Bounded, cancellable retries for cleanup calls.
//!
//! A "not found" answer to a delete counts as success: the resource is
//! already gone, which is normal when an earlier run cleaned up part of a
//! deployment. Reads stop on not-found too and hand back `None`.

use crate::arm::ArmError;
use crate::progress::Reporter;
use azbake_common::defaults::{
    DEFAULT_DELETE_ATTEMPT_TIMEOUT_SECS, DEFAULT_RETRY_INITIAL_BACKOFF_SECS,
    DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_BACKOFF_SECS, DEFAULT_RETRY_MULTIPLIER,
};
use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backoff policy for one resource's deletion attempts
///
/// In config files the delays are given in milliseconds
/// (`initial_backoff_ms`, `max_backoff_ms`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(rename = "initial_backoff_ms", with = "millis")]
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts
    #[serde(rename = "max_backoff_ms", with = "millis")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_backoff: Duration::from_secs(DEFAULT_RETRY_INITIAL_BACKOFF_SECS),
            max_backoff: Duration::from_secs(DEFAULT_RETRY_MAX_BACKOFF_SECS),
            multiplier: DEFAULT_RETRY_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delays between attempts: `initial * multiplier^n`, capped at `max_backoff`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier.max(1.0))
            .with_max_times(self.attempts().saturating_sub(1) as usize)
            .build()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// How a successful run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The action succeeded
    Done,
    /// The gateway reported the resource as already gone
    AlreadyGone,
}

/// Final result of a retried action
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub attempts: u32,
    pub result: Result<Completion, ArmError>,
}

impl AttemptOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs an action under a [`RetryPolicy`], one attempt at a time.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    attempt_timeout: Duration,
    reporter: Arc<dyn Reporter>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            policy,
            attempt_timeout: Duration::from_secs(DEFAULT_DELETE_ATTEMPT_TIMEOUT_SECS),
            reporter,
        }
    }

    /// Bound each attempt to `timeout`
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Run `action` until it succeeds, reports not-found, exhausts the
    /// policy, or `cancel` fires.
    ///
    /// Never panics and never returns early for sibling failures; the
    /// caller gets a [`AttemptOutcome`] in every case.
    pub async fn run<F, Fut>(&self, label: &str, cancel: &CancellationToken, action: F) -> AttemptOutcome
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), ArmError>>,
    {
        let (attempts, result) = self.attempt(Verb::Delete, label, cancel, action).await;
        let result = match result {
            Ok(()) => {
                info!(resource = %label, attempts, "Deleted");
                self.reporter.progress(&format!("Deleted {label}"));
                Ok(Completion::Done)
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %label, attempts, "Already deleted");
                self.reporter.progress(&format!("{label} already deleted"));
                Ok(Completion::AlreadyGone)
            }
            Err(e) => Err(e),
        };
        AttemptOutcome { attempts, result }
    }

    /// Read a value under the same policy as deletions.
    ///
    /// Not-found is final and comes back as `Ok(None)`.
    pub async fn fetch<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<Option<T>, ArmError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ArmError>>,
    {
        match self.attempt(Verb::Read, label, cancel, action).await.1 {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        verb: Verb,
        label: &str,
        cancel: &CancellationToken,
        action: F,
    ) -> (u32, Result<T, ArmError>)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ArmError>>,
    {
        let max_attempts = self.policy.attempts();
        let mut delays = self.policy.delays();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(verb, label, attempts);
            }

            attempts += 1;
            match verb {
                Verb::Delete => self
                    .reporter
                    .progress(&format!("Deleting {label} (attempt {attempts}/{max_attempts})")),
                Verb::Read => debug!(resource = %label, attempt = attempts, "Reading"),
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(verb, label, attempts),
                r = tokio::time::timeout(self.attempt_timeout, action()) => match r {
                    Ok(r) => r,
                    Err(_) => Err(ArmError::Timeout { secs: self.attempt_timeout.as_secs() }),
                },
            };

            let error = match result {
                Ok(value) => return (attempts, Ok(value)),
                Err(e) if e.is_not_found() => return (attempts, Err(e)),
                Err(e) if e.is_cancelled() => return self.cancelled(verb, label, attempts),
                Err(e) => e,
            };

            if attempts >= max_attempts {
                warn!(resource = %label, attempts, error = %error, "Giving up after retries");
                self.reporter.error(&format!(
                    "Failed to {} {label} after {attempts} attempts: {error}",
                    verb.as_str()
                ));
                return (attempts, Err(error));
            }

            let delay = delays.next().unwrap_or(self.policy.max_backoff);
            warn!(
                resource = %label,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                transient = error.is_retryable(),
                error = %error,
                "{} failed, retrying", verb.title()
            );
            self.reporter.progress(&format!(
                "{} of {label} failed ({error}), retrying in {delay:?}",
                verb.title()
            ));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(verb, label, attempts),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancelled<T>(&self, verb: Verb, label: &str, attempts: u32) -> (u32, Result<T, ArmError>) {
        warn!(resource = %label, attempts, "{} cancelled", verb.title());
        self.reporter.error(&format!(
            "{} of {label} cancelled after {attempts} attempts",
            verb.title()
        ));
        (attempts, Err(ArmError::Cancelled))
    }
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Delete,
    Read,
}

impl Verb {
    fn as_str(self) -> &'static str {
        match self {
            Verb::Delete => "delete",
            Verb::Read => "read",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Verb::Delete => "Delete",
            Verb::Read => "Read",
        }
    }
}
