//! Exponential backoff for transport-level retries.

use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How often, and how patiently, transient failures are retried.
///
/// The delay before retry `n` (1-based) is `initial_interval * multiplier^(n-1)`, capped at
/// `max_interval`. After `max_attempts` attempts in total the last error is returned.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            multiplier: 1.5,
            max_interval_ms: 60_000,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `attempt` (1-based) failed, or `None` if no attempts remain.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts.max(1) {
            return None;
        }
        let factor = self.multiplier.max(1.0).powi(attempt as i32 - 1);
        let millis = (self.initial_interval_ms as f64 * factor).min(self.max_interval_ms as f64);
        Some(Duration::from_millis(millis as u64))
    }

    /// Runs `op` until it succeeds, fails with something other than a transient error, or the
    /// attempts run out.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() => {
                    let Some(delay) = self.delay_after(attempt) else {
                        tracing::warn!(what, attempt, error = %e, "giving up after transient failures");
                        return Err(e);
                    };
                    tracing::debug!(what, attempt, ?delay, error = %e, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
