//! Retry utilities for chain reads and fee bumping for resubmissions
//!
//! Every RPC read goes through [`with_retry`] with a fixed delay and a fixed
//! attempt budget. Exhausting the budget surfaces as
//! [`WatcherError::RetriesExhausted`] and fails the current tick only.

use std::future::Future;
use std::time::Duration;

use eyre::Result;
use tracing::{debug, warn};

use crate::errors::WatcherError;

/// Fixed-delay retry policy for chain reads
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

/// Fee bump applied when a stuck transaction is replaced
#[derive(Debug, Clone)]
pub struct FeeBumpConfig {
    /// Percentage added per resubmission
    pub bump_percent: u32,
    /// Maximum multiplier over the original fee (e.g. 3.0 = 3x)
    pub max_multiplier: f64,
}

impl Default for FeeBumpConfig {
    fn default() -> Self {
        Self {
            bump_percent: 20,
            max_multiplier: 3.0,
        }
    }
}

impl FeeBumpConfig {
    /// Fee for a given resubmission attempt (0 = first broadcast)
    pub fn fee_for_attempt(&self, base_fee: u128, attempt: u32) -> u128 {
        if attempt == 0 {
            return base_fee;
        }

        let multiplier = 1.0 + (self.bump_percent as f64 / 100.0) * (attempt as f64);
        let capped_multiplier = multiplier.min(self.max_multiplier);

        (base_fee as f64 * capped_multiplier) as u128
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// RPC timeout, rate limit, 5xx
    Transient,
    /// Replacement or fee too low
    Underpriced,
    /// Nonce already used
    NonceTooLow,
    /// Call would revert or cannot be paid for; retrying cannot help
    Permanent,
    Unknown,
}

/// Classify an error message
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("nonce too low")
        || error_lower.contains("already known")
        || error_lower.contains("already been processed")
    {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("execution reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// Permanent errors (reverts, invalid params) are returned immediately.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = name, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                let error_str = e.to_string();
                let class = classify_error(&error_str);

                if class == ErrorClass::Permanent {
                    return Err(e.wrap_err(format!("{} failed permanently", name)));
                }

                if attempt >= max_attempts {
                    return Err(WatcherError::RetriesExhausted {
                        operation: name.to_string(),
                        attempts: attempt,
                        last_error: error_str,
                    }
                    .into());
                }

                // expected RPC noise stays at debug, anything unrecognised is surfaced
                if class == ErrorClass::Transient {
                    debug!(
                        operation = name,
                        attempt,
                        max = max_attempts,
                        error = %error_str,
                        "Retrying chain call after transient error"
                    );
                } else {
                    warn!(
                        operation = name,
                        attempt,
                        max = max_attempts,
                        delay_ms = policy.delay.as_millis() as u64,
                        error = %error_str,
                        "Retrying chain call"
                    );
                }
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
