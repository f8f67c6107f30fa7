//! Composable retry helper and per-instance request-id generation
//!
//! These are the pieces every transport shares. They are free-standing
//! rather than inherited state so each transport composes exactly what it
//! needs.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::config::TransportConfig;
use crate::error::TransportError;

/// Retry budget for connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts (a value of 0 still performs one attempt)
    pub attempts: u32,
    /// Sleep between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Derive the policy from a transport config's common options
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            delay: config.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: crate::config::DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(crate::config::DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Run `op` up to `policy.attempts` times, sleeping `policy.delay` between
/// attempts
///
/// Success on any attempt returns immediately. The error propagated is the
/// one from the final attempt.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    error = %err,
                    "attempt failed, retrying after delay"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Per-instance monotonic request-id source
///
/// Ids start at 1 and are never reused within the instance's lifetime.
/// Scoped to one transport instance; correlation never crosses instances.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicI64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
