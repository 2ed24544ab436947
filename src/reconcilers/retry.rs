// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with exponential backoff.
//!
//! Two layers:
//!
//! - [`retry_api_call`] retries a single Kubernetes API call on transient errors
//!   (429, 5xx, transport) for a short, bounded time.
//! - [`RetryBudget`] tracks transient reconcile failures per instance and turns
//!   them into requeue delays until the budget is spent.

use crate::ds_errors::ApiError;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Maximum total time to spend retrying one API call (30 seconds)
const MAX_ELAPSED_TIME_SECS: u64 = 30;

/// Initial retry interval (100ms)
const INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum interval between retries of one API call (5 seconds)
const MAX_INTERVAL_SECS: u64 = 5;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
pub struct ExponentialBackoff {
    current_interval: Duration,
    initial_interval: Duration,
    max_interval: Duration,
    max_elapsed_time: Option<Duration>,
    /// Backoff multiplier (typically 2.0 for doubling)
    multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    randomization_factor: f64,
    start_time: Instant,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None if max elapsed time exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = apply_jitter(interval, self.randomization_factor);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }
}

/// Apply randomization (jitter) to an interval.
fn apply_jitter(interval: Duration, randomization_factor: f64) -> Duration {
    if randomization_factor == 0.0 {
        return interval;
    }

    let secs = interval.as_secs_f64();
    let delta = secs * randomization_factor;
    let min = secs - delta;
    let max = secs + delta;

    let mut rng = rand::thread_rng();
    let jittered = rng.gen_range(min..=max);

    Duration::from_secs_f64(jittered.max(0.0))
}

/// Create default exponential backoff configuration for Kubernetes API retries.
///
/// # Configuration
///
/// - **Initial interval**: 100ms
/// - **Max interval**: 5 seconds
/// - **Max elapsed time**: 30 seconds total
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
///
/// Longer outages are handled one level up by [`RetryBudget`], which requeues
/// the whole reconciliation instead of holding a worker.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        Some(Duration::from_secs(MAX_ELAPSED_TIME_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Retry a Kubernetes API call with exponential backoff.
///
/// Automatically retries on transient errors (HTTP 429, 5xx, transport) and
/// fails immediately on everything else, including 404 and 409 which the
/// caller interprets.
///
/// # Errors
///
/// Returns the last [`ApiError`] if a non-retryable error is encountered or the
/// backoff is exhausted.
///
/// # Example
///
/// ```no_run
/// use kube::{Api, Client};
/// use k8s_openapi::api::core::v1::Service;
/// use ds_operator::reconcilers::retry::retry_api_call;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = Client::try_default().await?;
/// let api: Api<Service> = Api::namespaced(client, "identity");
///
/// let service = retry_api_call(|| api.get_opt("ds-idrepo"), "get service ds-idrepo").await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                let err = ApiError::from(&e);
                if !is_retryable(&err) {
                    debug!(
                        operation = operation_name,
                        code = ?err.code,
                        error = %err,
                        "Non-retryable Kubernetes API error"
                    );
                    return Err(err);
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %err,
                        "Retryable Kubernetes API error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %err,
                        "Backoff exhausted, giving up"
                    );
                    return Err(err);
                }
            }
        }
    }
}

/// Determine if an API error is worth retrying in place.
///
/// - **HTTP 429** (Too Many Requests) - Rate limiting
/// - **HTTP 5xx** (Server Errors) - Temporary API server issues
/// - **No response** - Network/connection issues
fn is_retryable(err: &ApiError) -> bool {
    match err.code {
        None => true,
        Some(code) => code == 429 || (500..600).contains(&code),
    }
}

/// What to do after a transient reconcile failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetDecision {
    /// Requeue after `delay`. `attempt` counts failures so far, starting at 1.
    Retry { attempt: u32, delay: Duration },
    /// The budget is spent. The counter has been reset for the next cycle.
    Exhausted { attempts: u32 },
}

/// Per-instance transient failure budget.
///
/// Delays grow as `base * 2^(attempt-1)` capped at `cap`, with ±10% jitter.
/// Held in memory only; a restart starts every instance with a fresh budget.
pub struct RetryBudget {
    attempts: Mutex<HashMap<String, u32>>,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl RetryBudget {
    #[must_use]
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
            base,
            cap,
        }
    }

    /// Record a transient failure for `key`.
    pub fn record_failure(&self, key: &str) -> BudgetDecision {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        let attempt = *count;

        if attempt >= self.max_attempts {
            attempts.remove(key);
            return BudgetDecision::Exhausted { attempts: attempt };
        }

        BudgetDecision::Retry {
            attempt,
            delay: apply_jitter(self.delay_for(attempt), RANDOMIZATION_FACTOR),
        }
    }

    /// Forget failures for `key` after a successful reconcile.
    pub fn reset(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Failures currently recorded for `key`.
    #[must_use]
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Un-jittered delay for the given attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
