//! Retry and error classification for ledger submissions and broadcasts
//!
//! Exponential backoff with full jitter, plus a string classifier for node
//! and RPC error messages.

use eyre::{eyre, Result};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
    /// Draw the actual sleep uniformly from `[0, backoff]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff ceiling for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Backoff to actually sleep for, jittered if enabled
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_for_attempt(attempt);
        if !self.jitter {
            return ceiling;
        }
        let ceiling_ms = ceiling.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// Transaction underpriced
    Underpriced,
    /// Nonce already consumed on-chain
    NonceTooLow,
    /// Nonce ahead of the chain - wait for pending transactions
    NonceTooHigh,
    /// Permanent failure - do not retry
    Permanent,
    /// Unknown error - may retry with backoff
    Unknown,
}

/// Classify an error message for retry decisions
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
        || error_lower.contains("min relay fee not met")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("nonce too low")
        || error_lower.contains("nonce already used")
        || error_lower.contains("already known")
        || error_lower.contains("already been processed")
        || error_lower.contains("txn-already-known")
        || error_lower.contains("txn-mempool-conflict")
    {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("nonce too high") {
        return ErrorClass::NonceTooHigh;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
        || error_lower.contains("not in the observer set")
        || error_lower.contains("is not supported")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Action to take after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    /// Retry after a backoff period
    RetryAfter(Duration),
    /// Stop retrying
    GiveUp,
}

/// Decide what to do after `attempt` failures ending in `error`
pub fn next_action(config: &RetryConfig, attempt: u32, error: &str) -> RetryAction {
    match classify_error(error) {
        ErrorClass::Permanent | ErrorClass::NonceTooLow => RetryAction::GiveUp,
        ErrorClass::NonceTooHigh => {
            if config.should_retry(attempt) {
                RetryAction::RetryAfter(config.max_backoff)
            } else {
                RetryAction::GiveUp
            }
        }
        ErrorClass::Transient | ErrorClass::Underpriced | ErrorClass::Unknown => {
            if config.should_retry(attempt) {
                RetryAction::RetryAfter(config.delay_for_attempt(attempt))
            } else {
                RetryAction::GiveUp
            }
        }
    }
}

/// Execute with retry logic; the operation receives the 0-indexed attempt
pub async fn with_retry<F, T, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let error_str = e.to_string();
                attempt += 1;

                match next_action(config, attempt, &error_str) {
                    RetryAction::RetryAfter(backoff) => {
                        warn!(
                            attempt,
                            max = config.max_retries,
                            ?backoff,
                            error = %error_str,
                            "Retrying after backoff"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    RetryAction::GiveUp => {
                        debug!(attempt, error = %error_str, "Giving up");
                        return Err(eyre!("Gave up after {} attempts: {}", attempt, error_str));
                    }
                }
            }
        }
    }
}
