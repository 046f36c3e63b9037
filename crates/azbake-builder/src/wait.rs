//! Polling with exponential backoff and cancellation support.
//!
//! Drives long-running ARM operations (template deployments, async deletes)
//! to completion: the caller supplies a check that reports whether the
//! operation finished, and this module handles delays, the overall timeout
//! and cancellation.

use crate::arm::ArmError;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for polling with exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
    /// Randomize delays
    pub jitter: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
            jitter: true,
        }
    }
}

/// Result of one readiness check
#[derive(Debug)]
pub enum Readiness<T> {
    /// The operation finished with this value
    Ready(T),
    /// Not finished; the provider may ask for a minimum delay
    NotReady { retry_after: Option<Duration> },
}

impl<T> Readiness<T> {
    pub fn not_ready() -> Self {
        Readiness::NotReady { retry_after: None }
    }
}

/// Poll until `check` reports ready, the timeout elapses or `cancel` fires.
///
/// # Returns
/// * `Ok(value)` - the value carried by [`Readiness::Ready`]
/// * `Err(ArmError::Timeout)` - `config.timeout` elapsed
/// * `Err(ArmError::Cancelled)` - the token was cancelled
/// * `Err(e)` - the check itself failed
pub async fn wait_for_resource<T, F, Fut>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    resource_name: &str,
) -> Result<T, ArmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Readiness<T>, ArmError>>,
{
    let start = tokio::time::Instant::now();
    let mut attempts = 0u32;

    let mut builder = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .without_max_times();
    if config.jitter {
        builder = builder.with_jitter();
    }
    let mut delays = builder.build();

    loop {
        attempts += 1;

        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(ArmError::Cancelled);
        }

        if start.elapsed() >= config.timeout {
            warn!(
                resource = %resource_name,
                attempts,
                timeout_secs = config.timeout.as_secs(),
                "Timed out waiting for resource"
            );
            return Err(ArmError::Timeout {
                secs: config.timeout.as_secs(),
            });
        }

        let retry_after = match check().await? {
            Readiness::Ready(value) => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(value);
            }
            Readiness::NotReady { retry_after } => retry_after,
        };

        let backoff = delays.next().unwrap_or(config.max_delay);
        let delay = retry_after.map_or(backoff, |floor| backoff.max(floor));
        // Never sleep past the deadline
        let delay = delay.min(config.timeout.saturating_sub(start.elapsed()));
        debug!(
            resource = %resource_name,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            "Resource not ready, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                return Err(ArmError::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            timeout: Duration::from_secs(5),
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_a_few_checks() {
        let calls = AtomicU32::new(0);
        let value = wait_for_resource(
            &fast_config(),
            None,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(Readiness::not_ready())
                } else {
                    Ok(Readiness::Ready("done"))
                }
            },
            "test",
        )
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let result: Result<(), _> = wait_for_resource(
            &fast_config(),
            None,
            || async { Ok(Readiness::not_ready()) },
            "never-ready",
        )
        .await;

        assert!(matches!(result, Err(ArmError::Timeout { secs: 5 })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_timeout() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = wait_for_resource(
            &fast_config(),
            Some(&cancel),
            || async { Ok(Readiness::not_ready()) },
            "cancelled",
        )
        .await;

        assert!(matches!(result, Err(ArmError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn check_error_is_returned() {
        let result: Result<(), _> = wait_for_resource(
            &fast_config(),
            None,
            || async { Err(ArmError::Throttled) },
            "failing",
        )
        .await;

        assert!(matches!(result, Err(ArmError::Throttled)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_is_a_floor() {
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        wait_for_resource(
            &fast_config(),
            None,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(Readiness::NotReady {
                        retry_after: Some(Duration::from_secs(1)),
                    })
                } else {
                    Ok(Readiness::Ready(()))
                }
            },
            "slow",
        )
        .await
        .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
