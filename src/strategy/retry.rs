//! Conflict retry policy
//!
//! A scope that loses a first-committer-wins race fails with a retryable
//! error and leaves no trace, so the whole scope can simply run again.

use crate::types::StoreError;
use std::thread;
use std::time::Duration;

/// How often and how patiently to retry a conflicting scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Base delay; attempt `n` sleeps `backoff * n` before the next try
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 32,
            backoff: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy, falling back to the default for zero attempts
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        let max_attempts = if max_attempts == 0 {
            let default = Self::default().max_attempts;
            tracing::warn!(
                "Invalid max_attempts ({}), using default ({})",
                max_attempts,
                default
            );
            default
        } else {
            max_attempts
        };

        Self {
            max_attempts,
            backoff,
        }
    }

    /// Never retry
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Run `op`, re-running it while it fails with a retryable error
///
/// # Returns
///
/// The first `Ok`, the first non-retryable error, or the last error once
/// `policy.max_attempts` is reached.
pub fn retry_on_conflict<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut attempt: u32 = 1;
    loop {
        match op() {
            Err(error) if error.is_retryable() && attempt < policy.max_attempts => {
                tracing::debug!(attempt, %error, "conflict, retrying scope");
                thread::sleep(policy.backoff * attempt);
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}
