use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::Duration;

/// How a response status is handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    RateLimited,
    Unauthorized,
    NotFound,
    Transient,
    Rejected,
}

pub fn classify(status: StatusCode, headers: &HeaderMap) -> ResponseClass {
    if status.is_success() {
        return ResponseClass::Success;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ResponseClass::RateLimited;
    }
    // GitLab signals some throttling as 403 with an exhausted quota header.
    if status == StatusCode::FORBIDDEN && quota_exhausted(headers) {
        return ResponseClass::RateLimited;
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ResponseClass::Unauthorized,
        StatusCode::NOT_FOUND => ResponseClass::NotFound,
        StatusCode::REQUEST_TIMEOUT => ResponseClass::Transient,
        s if s.is_server_error() => ResponseClass::Transient,
        _ => ResponseClass::Rejected,
    }
}

fn quota_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        == Some(0)
}

/// Server-provided wait hint: `Retry-After` (seconds or HTTP date), then `RateLimit-Reset` (epoch seconds).
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(value) = headers.get("retry-after").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
            return Some(until(at.with_timezone(&Utc), now));
        }
    }
    let reset = headers
        .get("ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())?;
    let at = DateTime::<Utc>::from_timestamp(reset, 0)?;
    Some(until(at, now))
}

fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff after the given (1-based) failed attempt, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay before the next attempt. A server hint is honoured as given;
    /// only the computed backoff is capped.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        hint.unwrap_or_else(|| self.backoff(attempt))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts.max(1)
    }
}
