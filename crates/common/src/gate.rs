//! Readiness gate: bounded polling for dependent services.
//!
//! Used before any step that needs another component live (the proxy
//! answering on the challenge path, the backend accepting connections).
//! Polls at a fixed interval until the check passes or the timeout elapses;
//! never blocks unbounded.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Readiness gate errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Readiness check did not pass within {waited:?} ({attempts} attempts)")]
    Timeout {
        /// Total time spent polling
        waited: Duration,
        /// Number of checks performed
        attempts: u32,
    },
}

/// Poll `check` until it returns `true` or `timeout` elapses.
///
/// The check runs immediately, then every `poll_interval`. The final check
/// is performed before declaring timeout, so a timeout shorter than one
/// interval still gets at least one attempt.
pub async fn wait_until_ready<F, Fut>(
    mut check: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), GateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        trace!(attempt = attempts, "Running readiness check");

        if check().await {
            debug!(
                attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Readiness check passed"
            );
            return Ok(());
        }

        if start.elapsed() >= timeout {
            warn!(
                attempts,
                waited_ms = start.elapsed().as_millis() as u64,
                "Readiness check timed out"
            );
            return Err(GateError::Timeout {
                waited: start.elapsed(),
                attempts,
            });
        }

        tokio::time::sleep(poll_interval).await;
    }
}
