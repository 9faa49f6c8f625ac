// In-memory sliding-window rate limiter, keyed on (client key, endpoint).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::RateLimit;

/// Error returned when a rate limit is exceeded. `retry_after_secs` is how
/// long the caller must wait before the oldest request leaves the window.
#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub max: u32,
    pub retry_after_secs: u64,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rate limit exceeded: max {} requests, retry after {}s",
            self.max, self.retry_after_secs
        )
    }
}

/// Thread-safe sliding-window rate limiter. Keys are free-form strings of
/// the shape `"{endpoint}:{client-key}"`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check the key against `limit`. Records the request and returns Ok(())
    /// if within the window, otherwise returns the retry-after.
    pub fn check(&self, key: &str, limit: RateLimit) -> Result<(), RateLimitError> {
        let window = Duration::from_secs(limit.window_secs);
        let now = Instant::now();
        let mut map = self.inner.lock().unwrap();
        let entries = map.entry(key.to_string()).or_default();

        while let Some(front) = entries.front() {
            if now.duration_since(*front) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= limit.max_requests as usize {
            let retry_after_secs = entries
                .front()
                .map(|oldest| {
                    let elapsed = now.duration_since(*oldest);
                    window.saturating_sub(elapsed).as_secs().max(1)
                })
                .unwrap_or(1);
            return Err(RateLimitError {
                max: limit.max_requests,
                retry_after_secs,
            });
        }

        entries.push_back(now);
        Ok(())
    }

    /// Drop keys whose entries have all expired. Called opportunistically;
    /// the per-check pruning already bounds each deque.
    pub fn cleanup(&self, window: Duration) {
        let now = Instant::now();
        let mut map = self.inner.lock().unwrap();
        map.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < window);
            !entries.is_empty()
        });
    }

    /// Current in-window count for a key (diagnostics and tests).
    pub fn current_count(&self, key: &str) -> usize {
        let map = self.inner.lock().unwrap();
        map.get(key).map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
