//! Backoff policy for transient marketplace failures
//!
//! `max_retries` is the total number of attempts a request may make. The
//! delay after failed attempt `n` (0-based) is
//! `min(2^n * base_delay * multiplier, max_delay)`, where the multiplier is 1
//! for server and transport failures and `rate_limit_multiplier` for 429s.

use std::time::Duration;

use crate::config::RetryConfig;

/// Why an attempt is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerError,
    /// Connection, timeout or body read failure
    Transport,
}

impl RetryReason {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryReason::RateLimited => "rate_limited",
            RetryReason::ServerError => "server_error",
            RetryReason::Transport => "transport",
        }
    }
}

/// Backoff and attempt budget for one marketplace
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a policy with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Total attempts allowed, never less than one
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.max(1)
    }

    /// Whether another attempt may follow failed attempt `attempt` (0-based)
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts()
    }

    /// Delay after failed attempt `attempt` (0-based)
    pub fn backoff(&self, attempt: u32, reason: RetryReason) -> Duration {
        let multiplier = match reason {
            RetryReason::RateLimited => self.config.rate_limit_multiplier.max(1) as u64,
            _ => 1,
        };
        let exp = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = exp
            .saturating_mul(self.config.base_delay_ms)
            .saturating_mul(multiplier)
            .min(self.config.max_delay_ms);

        Duration::from_millis(delay_ms)
    }

    /// Delay requested by a `Retry-After` header, capped at `max_delay`
    pub fn retry_after(&self, seconds: u64) -> Duration {
        Duration::from_secs(seconds).min(self.cap())
    }

    /// Upper bound of any single delay
    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.config.max_delay_ms)
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
