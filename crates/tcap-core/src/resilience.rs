//! Timeout and retry-with-backoff wrappers for network-bound steps.
//!
//! Composition used by every blob-store and ledger call:
//! ```text
//! with_retry ── attempt 1 ── with_timeout(op) ──▶ ok → return
//!            │                                 └▶ err → classify
//!            ├─ sleep(min(initial * multiplier^(n-1), max) ± jitter)
//!            └─ attempt n ... until max_attempts or a terminal error
//! ```
//!
//! The wrappers hold no state between invocations; a policy is plain data.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::ResilienceConfig;
use crate::error::NetworkError;

/// Whether a failed attempt may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Terminal,
}

/// Errors that know whether retrying them can help.
pub trait Classify {
    fn retry_class(&self) -> RetryClass;
}

const TERMINAL_STATUS: [u16; 5] = [400, 401, 403, 404, 413];
const RETRYABLE_STATUS: [u16; 4] = [408, 429, 503, 504];
const TERMINAL_MARKERS: [&str; 3] = ["invalid", "required", "validation"];

/// Classify a failure from its status code (if any) and message.
///
/// Status codes win over message text. Unlisted 4xx codes are terminal,
/// everything else (5xx, transport, timeouts) is retryable.
pub fn classify_failure(status: Option<u16>, message: &str) -> RetryClass {
    if let Some(status) = status {
        if TERMINAL_STATUS.contains(&status) {
            return RetryClass::Terminal;
        }
        if RETRYABLE_STATUS.contains(&status) {
            return RetryClass::Retryable;
        }
        if (400..500).contains(&status) {
            return RetryClass::Terminal;
        }
    }

    let lower = message.to_ascii_lowercase();
    if TERMINAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return RetryClass::Terminal;
    }

    RetryClass::Retryable
}

impl Classify for NetworkError {
    fn retry_class(&self) -> RetryClass {
        match self {
            NetworkError::Status { status, message } => classify_failure(Some(*status), message),
            NetworkError::Transport(message) => classify_failure(None, message),
            NetworkError::NotFound(_)
            | NetworkError::InvalidResponse(_)
            | NetworkError::IntegrityMismatch { .. } => RetryClass::Terminal,
        }
    }
}

/// Backoff parameters for [`with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the computed delay used as a symmetric random spread.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay after failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        if !capped.is_finite() || capped < 0.0 {
            return self.max_delay;
        }
        Duration::from_secs_f64(capped)
    }

    /// [`backoff_delay`](Self::backoff_delay) randomized by `± jitter_factor`.
    ///
    /// The factor is capped at 1.0; a non-positive or non-finite factor
    /// means no jitter.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let base = delay.as_secs_f64();
        if !(self.jitter_factor > 0.0 && self.jitter_factor.is_finite()) || base == 0.0 {
            return delay;
        }
        let spread = base * self.jitter_factor.min(1.0);
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(cfg: &ResilienceConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            multiplier: cfg.multiplier,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter_factor: cfg.jitter_factor,
        }
    }
}

/// Retry policy plus the per-attempt timeouts for each collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceSettings {
    pub retry: RetryPolicy,
    pub blob_timeout: Duration,
    pub ledger_timeout: Duration,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for ResilienceSettings {
    fn from(cfg: &ResilienceConfig) -> Self {
        Self {
            retry: RetryPolicy::from(cfg),
            blob_timeout: Duration::from_millis(cfg.blob_timeout_ms),
            ledger_timeout: Duration::from_millis(cfg.ledger_timeout_ms),
        }
    }
}

/// An operation did not finish within its budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{label} timed out after {}ms", .duration.as_millis())]
pub struct TimeoutError {
    pub label: String,
    pub duration: Duration,
}

impl Classify for TimeoutError {
    fn retry_class(&self) -> RetryClass {
        RetryClass::Retryable
    }
}

/// Outcome of one timed attempt.
#[derive(Debug)]
pub enum AttemptError<E> {
    TimedOut(TimeoutError),
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::TimedOut(t) => fmt::Display::fmt(t, f),
            AttemptError::Failed(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AttemptError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttemptError::TimedOut(t) => Some(t),
            AttemptError::Failed(e) => Some(e),
        }
    }
}

impl<E: Classify> Classify for AttemptError<E> {
    fn retry_class(&self) -> RetryClass {
        match self {
            AttemptError::TimedOut(t) => t.retry_class(),
            AttemptError::Failed(e) => e.retry_class(),
        }
    }
}

/// The last error of a retried operation, with how far it got.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub label: String,
    pub attempts: u32,
    /// false when a terminal error stopped the loop early
    pub exhausted: bool,
    pub source: E,
}

impl<E> RetryFailure<E> {
    pub fn into_inner(self) -> E {
        self.source
    }
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.label, self.attempts, self.source
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryFailure<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Race `fut` against a timer. On expiry the future is dropped; any I/O it
/// started may still complete but its result is discarded.
pub async fn with_timeout<F, T>(label: &str, duration: Duration, fut: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!(label, duration_ms = duration.as_millis() as u64, "operation timed out");
            Err(TimeoutError {
                label: label.to_string(),
                duration,
            })
        }
    }
}

/// Re-invoke `op` on retryable failures until it succeeds or the policy is
/// exhausted. Terminal failures return after a single attempt.
pub async fn with_retry<T, E, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if err.retry_class() == RetryClass::Terminal {
                    warn!(label, attempt, error = %err, "non-retryable failure");
                    return Err(RetryFailure {
                        label: label.to_string(),
                        attempts: attempt,
                        exhausted: false,
                        source: err,
                    });
                }
                if attempt >= max_attempts {
                    warn!(label, attempt, error = %err, "retries exhausted");
                    return Err(RetryFailure {
                        label: label.to_string(),
                        attempts: attempt,
                        exhausted: true,
                        source: err,
                    });
                }

                let delay = policy.jittered_delay(attempt);
                warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Timeout wraps each attempt, retry wraps the sequence of timed attempts.
pub async fn resilient<T, E, F, Fut>(
    label: &str,
    timeout: Duration,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryFailure<AttemptError<E>>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    with_retry(label, policy, || {
        let fut = op();
        async move {
            match with_timeout(label, timeout, fut).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(AttemptError::Failed(e)),
                Err(t) => Err(AttemptError::TimedOut(t)),
            }
        }
    })
    .await
}
