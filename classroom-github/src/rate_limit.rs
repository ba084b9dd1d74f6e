//! GitHub rate-limit tracking
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` from every response
//! into state shared by all workers, and refuses new calls while the budget
//! is below the configured buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::{debug, info};

/// Shared rate-limit state updated after every API response
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Remaining calls in the current window; `u64::MAX` until first seen
    remaining: Arc<AtomicU64>,
    /// Unix timestamp at which the window resets
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Update state from response headers
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        if let Some(remaining) = header_u64(headers, "x-ratelimit-remaining") {
            self.remaining.store(remaining, Ordering::Relaxed);
        }
        if let Some(reset) = header_u64(headers, "x-ratelimit-reset") {
            self.reset_at.store(reset, Ordering::Relaxed);
        }
    }

    /// Time left until the window resets, if the budget is below `buffer`
    ///
    /// `None` means calls may proceed.
    pub fn exhausted(&self, buffer: u32) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining == u64::MAX || remaining >= u64::from(buffer) {
            debug!(remaining, buffer, "Rate limit OK");
            return None;
        }

        let wait = self.retry_after_secs();
        if wait == 0 {
            return None;
        }
        info!(
            remaining,
            reset_in_secs = wait,
            buffer,
            "Rate limit budget low, backing off"
        );
        Some(Duration::from_secs(wait))
    }

    /// Seconds until the window resets, 0 if already reset
    pub fn retry_after_secs(&self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        self.reset_at().saturating_sub(now)
    }
}

pub(crate) fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(remaining: &str, reset: u64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", remaining.parse().unwrap());
        headers.insert("x-ratelimit-reset", reset.to_string().parse().unwrap());
        headers
    }

    fn now() -> u64 {
        chrono::Utc::now().timestamp() as u64
    }

    #[test]
    fn test_unknown_budget_allows_calls() {
        let state = RateLimitState::new();
        assert_eq!(state.remaining(), u64::MAX);
        assert_eq!(state.exhausted(50), None);
    }

    #[test]
    fn test_update_from_headers() {
        let state = RateLimitState::new();
        state.update_from_headers(&headers("42", 1_700_000_000));
        assert_eq!(state.remaining(), 42);
        assert_eq!(state.reset_at(), 1_700_000_000);
    }

    #[test]
    fn test_low_budget_blocks_until_reset() {
        let state = RateLimitState::new();
        state.update_from_headers(&headers("3", now() + 30));

        let wait = state.exhausted(50).unwrap();
        assert!((29..=31).contains(&wait.as_secs()));
        assert_eq!(state.exhausted(3), None);
    }

    #[test]
    fn test_past_reset_allows_calls() {
        let state = RateLimitState::new();
        state.update_from_headers(&headers("0", 1));
        assert_eq!(state.exhausted(50), None);
    }

    #[test]
    fn test_state_shared_between_clones() {
        let state = RateLimitState::new();
        let clone = state.clone();
        clone.update_from_headers(&headers("7", 1));
        assert_eq!(state.remaining(), 7);
    }
}
