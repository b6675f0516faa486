//! In-memory fixed-window rate limiting.
//!
//! Tracks, per caller key, the timestamps of admitted requests within a
//! trailing window. Entries older than the window are purged lazily on the
//! next check for that key, and a key whose window has drained is removed
//! from the store entirely. State is process-local and lost on restart; this
//! is an abuse guard, not a durable quota.

use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use dashmap::DashMap;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether this request was admitted (and its timestamp recorded).
    pub admitted: bool,
    /// The limit in force for this check.
    pub limit: u32,
    /// Admissions left in the current window after this check.
    pub remaining: u32,
    /// Epoch milliseconds at which the oldest recorded admission expires.
    pub reset: i64,
}

impl RateLimitDecision {
    /// Standard rate-limit response headers.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-Limit", header_num(self.limit as i64));
        headers.insert("X-RateLimit-Remaining", header_num(self.remaining as i64));
        headers.insert("X-RateLimit-Reset", header_num(self.reset));
        headers
    }

    /// Whole seconds until the window opens again, rounded up, floored at zero.
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let delta = self.reset - now_ms;
        if delta <= 0 {
            0
        } else {
            ((delta + 999) / 1000) as u64
        }
    }
}

fn header_num(n: i64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).expect("numeric header value")
}

/// Fixed-window request counter keyed by caller identity.
///
/// Sliding-window-by-purge: a burst is bounded to `limit` requests per
/// rolling window, with the boundary only as smooth as lazy purging allows.
pub struct RateLimiter {
    store: DashMap<String, Vec<i64>>,
    default_limit: u32,
    default_window_ms: i64,
}

impl RateLimiter {
    pub fn new(default_limit: u32, default_window_ms: i64) -> Self {
        Self {
            store: DashMap::new(),
            default_limit,
            default_window_ms,
        }
    }

    /// Check (and, when admitted, record) one request for `key` with the
    /// default limit and window.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_with(key, None, None)
    }

    /// Check with per-call overrides for limit and window.
    pub fn check_with(
        &self,
        key: &str,
        limit: Option<u32>,
        window_ms: Option<i64>,
    ) -> RateLimitDecision {
        self.check_at(key, limit, window_ms, Utc::now().timestamp_millis())
    }

    fn check_at(
        &self,
        key: &str,
        limit: Option<u32>,
        window_ms: Option<i64>,
        now: i64,
    ) -> RateLimitDecision {
        let limit = limit.unwrap_or(self.default_limit);
        let window_ms = window_ms.unwrap_or(self.default_window_ms);

        let mut entry = self.store.entry(key.to_string()).or_default();
        let timestamps = entry.value_mut();

        // Lazy purge: only admitted timestamps are stored, so everything
        // still inside the window counts against the limit.
        timestamps.retain(|&ts| now - ts < window_ms);

        let admitted = (timestamps.len() as u32) < limit;
        if admitted {
            timestamps.push(now);
        }

        let count = timestamps.len() as u32;
        let reset = match timestamps.first() {
            Some(&oldest) => oldest + window_ms,
            None => now + window_ms,
        };
        let empty = timestamps.is_empty();
        drop(entry);

        if empty {
            self.store.remove(key);
        }

        RateLimitDecision {
            admitted,
            limit,
            remaining: limit.saturating_sub(count),
            reset,
        }
    }
}
