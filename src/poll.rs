//! Long-running-operation polling.
//!
//! The managed services expose status fields, not completion callbacks, so
//! every wait in the system goes through this module:
//!
//! | Call site | Variant | Target |
//! |-----------|---------|--------|
//! | collection activation | [`wait_for_unless`] | status `ACTIVE` |
//! | knowledge base activation | [`wait_for_unless`] | status `ACTIVE` |
//! | ingestion job | [`wait_for_unless`] | status `COMPLETE` |
//! | data source deletion | [`wait_for`] | empty listing |
//! | knowledge base deletion | [`wait_until_gone`] | not found |
//! | collection deletion | [`wait_for`] | empty listing |
//!
//! Polling uses a fixed interval with no backoff or jitter. A wait that
//! exceeds its timeout returns [`WaitError::Timeout`]; deciding whether that
//! ends the process is left to the caller.
//!
//! Time is measured with the tokio clock, so tests can run the loops under
//! a paused clock without real sleeping.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::error::{ApiError, WaitError};

/// Interval and timeout for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    /// Name used in logs and in the timeout error.
    pub operation: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub fn new(operation: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            interval,
            timeout,
        }
    }
}

/// Poll `fetch` until `extract` of its result equals `until`.
///
/// Each round: if more than `spec.timeout` has elapsed, return
/// [`WaitError::Timeout`]; otherwise fetch, compare, and either return the
/// matching value or sleep `spec.interval`. Errors from `fetch` (including
/// not-found) end the wait as [`WaitError::Api`].
pub async fn wait_for<T, V, F, Fut, X>(
    spec: &PollSpec,
    fetch: F,
    extract: X,
    until: &V,
) -> Result<V, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    X: Fn(&T) -> V,
    V: PartialEq + Debug,
{
    wait_for_unless(spec, fetch, extract, until, |_| false).await
}

/// Like [`wait_for`], but stops early with [`WaitError::UnexpectedState`]
/// when `is_failure` accepts the current value (e.g. an ingestion job that
/// ended `FAILED` will never reach `COMPLETE`).
pub async fn wait_for_unless<T, V, F, Fut, X, P>(
    spec: &PollSpec,
    mut fetch: F,
    extract: X,
    until: &V,
    is_failure: P,
) -> Result<V, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    X: Fn(&T) -> V,
    P: Fn(&V) -> bool,
    V: PartialEq + Debug,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let elapsed = start.elapsed();
        if elapsed > spec.timeout {
            error!(
                operation = %spec.operation,
                timeout_secs = spec.timeout.as_secs(),
                "Wait operation failed to complete in time"
            );
            return Err(WaitError::Timeout {
                operation: spec.operation.clone(),
                timeout: spec.timeout,
                elapsed,
            });
        }

        attempt += 1;
        let snapshot = fetch().await?;
        let value = extract(&snapshot);

        if &value == until {
            info!(operation = %spec.operation, attempt, "Operation completed successfully");
            return Ok(value);
        }
        if is_failure(&value) {
            error!(operation = %spec.operation, state = ?value, "Operation ended in a failure state");
            return Err(WaitError::UnexpectedState {
                operation: spec.operation.clone(),
                state: format!("{:?}", value),
            });
        }

        info!(
            operation = %spec.operation,
            attempt,
            current = ?value,
            "Operation is still in progress..."
        );
        sleep(spec.interval).await;
    }
}

/// Poll until `fetch` reports the resource as not found.
///
/// Absence is the success condition. While the resource still exists with
/// the `interim` value (typically `DELETING`), the loop sleeps and retries.
/// Any other value means the deletion went wrong and is reported as
/// [`WaitError::UnexpectedState`]. Errors other than not-found propagate.
pub async fn wait_until_gone<T, V, F, Fut, X>(
    spec: &PollSpec,
    mut fetch: F,
    extract: X,
    interim: &V,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    X: Fn(&T) -> V,
    V: PartialEq + Debug,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let elapsed = start.elapsed();
        if elapsed > spec.timeout {
            error!(
                operation = %spec.operation,
                timeout_secs = spec.timeout.as_secs(),
                "Delete operation failed to complete in time"
            );
            return Err(WaitError::Timeout {
                operation: spec.operation.clone(),
                timeout: spec.timeout,
                elapsed,
            });
        }

        attempt += 1;
        match fetch().await {
            Err(ApiError::NotFound { resource }) => {
                debug!(%resource, "lookup reports not found");
                info!(operation = %spec.operation, attempt, "Resource successfully deleted");
                return Ok(());
            }
            Err(other) => return Err(other.into()),
            Ok(snapshot) => {
                let value = extract(&snapshot);
                if &value != interim {
                    error!(operation = %spec.operation, state = ?value, "Resource left the deleting state");
                    return Err(WaitError::UnexpectedState {
                        operation: spec.operation.clone(),
                        state: format!("{:?}", value),
                    });
                }
                info!(operation = %spec.operation, attempt, "Resource is still deleting...");
                sleep(spec.interval).await;
            }
        }
    }
}
