//! CA client error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Errors from certificate authority operations.
///
/// The orchestrator branches on these variants: rate limits impose a
/// hold-off, validation failures wait for the environment to be fixed,
/// transient failures are retried with backoff, and invalid requests stop
/// retrying until configuration changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaError {
    #[error("CA rate limit hit, retry after {retry_after:?}")]
    RateLimited {
        /// Do not contact the CA again before this much time has passed
        retry_after: Duration,
    },

    #[error("Domain validation failed: {0}")]
    ValidationFailed(String),

    #[error("Transient CA failure: {0}")]
    Transient(String),

    #[error("Invalid certificate request: {0}")]
    InvalidRequest(String),
}

impl CaError {
    /// Whether immediate in-tick retry (with backoff) is appropriate.
    ///
    /// Only transient failures qualify; everything else either needs time
    /// to pass, an environment fix, or a configuration change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors from challenge token publication
#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("Failed to write challenge token: {0}")]
    Io(#[from] std::io::Error),
}
