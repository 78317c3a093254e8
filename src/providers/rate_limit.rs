use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ClientConfig;

/// Retry and backoff settings shared by every request an [`ApiClient`] sends.
///
/// [`ApiClient`]: super::client::ApiClient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub min_rate_limit_wait: Duration,
    pub margin: Duration,
    pub wait_on_exhaustion: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.backoff_ms),
            min_rate_limit_wait: Duration::from_secs(config.min_rate_limit_wait_secs),
            margin: Duration::from_secs(config.rate_limit_margin_secs),
            wait_on_exhaustion: config.wait_on_exhaustion,
        }
    }

    /// Exponential delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor)
    }

    /// Wait after an explicit rate-limit response.
    pub fn rate_limited_wait(&self, state: &RateLimitState, now: i64) -> Duration {
        let until_reset = state.until_reset(now).unwrap_or(Duration::ZERO);
        until_reset.max(self.min_rate_limit_wait) + self.margin
    }
}

/// Budget reported by one remote endpoint. Timestamps are Unix seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset: Option<i64>,
}

impl RateLimitState {
    /// Refresh from response headers. Keys are expected lower-cased.
    pub fn update(&mut self, headers: &HashMap<String, String>, now: i64) {
        let read = |name: &str| {
            headers
                .get(&format!("x-ratelimit-{name}"))
                .or_else(|| headers.get(&format!("ratelimit-{name}")))
                .and_then(|v| v.trim().parse::<i64>().ok())
        };

        if let Some(limit) = read("limit") {
            self.limit = u64::try_from(limit).ok();
        }
        if let Some(remaining) = read("remaining") {
            self.remaining = u64::try_from(remaining).ok();
        }
        if let Some(reset) = read("reset") {
            self.reset = Some(reset);
        }
        if let Some(retry_after) = headers
            .get("retry-after")
            .and_then(|v| v.trim().parse::<i64>().ok())
        {
            self.reset = Some(now + retry_after);
        }
    }

    pub fn until_reset(&self, now: i64) -> Option<Duration> {
        self.reset
            .filter(|reset| *reset > now)
            .map(|reset| Duration::from_secs((reset - now) as u64))
    }

    /// Time to sleep before the next call, if the budget is spent.
    pub fn exhausted_wait(&self, now: i64) -> Option<Duration> {
        match self.remaining {
            Some(0) => self.until_reset(now),
            _ => None,
        }
    }
}

/// Per-endpoint rate-limit bookkeeping.
///
/// Each host gets its own async mutex; a request holds it from the pre-flight
/// check until its response headers have been recorded.
#[derive(Debug, Default)]
pub struct RateLimiter {
    endpoints: Mutex<HashMap<String, Arc<tokio::sync::Mutex<RateLimitState>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, host: &str) -> Arc<tokio::sync::Mutex<RateLimitState>> {
        let mut endpoints = match self.endpoints.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        endpoints.entry(host.to_string()).or_default().clone()
    }

    #[cfg(test)]
    pub async fn snapshot(&self, host: &str) -> RateLimitState {
        *self.endpoint(host).lock().await
    }
}
