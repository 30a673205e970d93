//! Per-endpoint-class request limiter
//!
//! Each endpoint class (listings, inventory, orders, ...) gets a fixed window
//! of `requests` per `per`. A caller over budget waits until the current
//! window ends. Windows are tracked independently per class, so throttled
//! order reads never delay listing writes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{RateBudgetConfig, RateLimitConfig};

/// Window state for one endpoint class
#[derive(Debug, Clone)]
struct Window {
    /// Requests admitted in the current window
    count: u32,

    /// Start of the current window
    started: Instant,
}

/// Fixed-window limiter keyed by endpoint class
///
/// Thread-safe; share it behind an `Arc` between all callers hitting the
/// same marketplace account.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Create a limiter with the given budgets
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Budget applied to a class
    pub fn budget(&self, class: &str) -> RateBudgetConfig {
        self.config.budget_for(class)
    }

    /// Wait until a request of `class` may be sent, then count it
    ///
    /// Returns the total time spent waiting.
    pub async fn acquire(&self, class: &str) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            match self.try_acquire(class) {
                None => return waited,
                Some(wait) => {
                    tracing::debug!(
                        class = %class,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limit reached, waiting for next window"
                    );
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Count a request if the budget allows it
    ///
    /// Returns `None` when admitted, otherwise the time until the current
    /// window ends.
    pub fn try_acquire(&self, class: &str) -> Option<Duration> {
        let budget = self.budget(class);
        let window_len = budget.per.as_duration();
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(class.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        let elapsed = now.duration_since(window.started);
        if elapsed >= window_len {
            window.count = 0;
            window.started = now;
        }

        if window.count < budget.requests.max(1) {
            window.count += 1;
            None
        } else {
            Some(window_len.saturating_sub(elapsed).max(Duration::from_millis(1)))
        }
    }

    /// Requests admitted in the current window of a class
    pub fn current_count(&self, class: &str) -> u32 {
        let window_len = self.budget(class).per.as_duration();
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        match windows.get(class) {
            Some(window) if window.started.elapsed() < window_len => window.count,
            _ => 0,
        }
    }

    /// Forget all window state
    pub fn reset(&self) {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
