// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for record-store round trips.
//!
//! Only idempotent operations go through [`retry`]: reads, payload upserts
//! and connection setup. Counter scripts are sent once.
//!
//! # Example
//!
//! ```
//! use analysis_cache::RetryConfig;
//! use std::time::Duration;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//! assert_eq!(startup.delay_for(1), Duration::from_millis(200));
//! assert_eq!(startup.delay_for(2), Duration::from_millis(400));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Connection setup: 5 attempts, fails within a few seconds on a bad URL.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Request path: 3 quick attempts, then surface the error.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
        }
    }

    /// Single attempt.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.factor.powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_delay.mul_f64(exp.max(0.0));
        delay.min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is reached.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1usize;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Store operation recovered");
                }
                return Ok(val);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(operation = operation_name, attempt, error = %err, "Store operation failed, giving up");
                return Err(err);
            }
            Err(err) => {
                let delay = config.delay_for(attempt as u32);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Store operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
