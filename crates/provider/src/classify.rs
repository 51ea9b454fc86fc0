//! Error classification for actor-run API responses
//!
//! The provider reports account-level trouble in free text: exhausted credits
//! come back as 402 or as a 403 naming the plan limit, throttling as 429 or a
//! "rate limit" message. This module is the only place that reads those
//! messages; everything downstream works on `TaskError` kinds.

use crate::error::TaskError;

/// Message fragments that mean the account ran out of credits or plan quota.
const QUOTA_PATTERNS: &[&str] = &[
    "monthly usage hard limit exceeded",
    "platform-feature-disabled",
    "insufficient",
    "usage limit",
];

/// Message fragments that mean the provider throttled the request.
const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "rate-limit", "too many requests"];

/// Longest response excerpt carried in an error message.
const MAX_DETAIL_CHARS: usize = 200;

/// Classify a non-2xx response by HTTP status and body.
///
/// Quota phrases win regardless of status. Otherwise 401/403 are `Auth`,
/// 402 is `Quota`, 429 or a rate-limit phrase is `RateLimited`, and
/// everything else (408, 5xx, unknown 4xx) is `Transient`.
pub fn classify_status(status: u16, body: &str) -> TaskError {
    let lower = body.to_lowercase();
    let detail = format!("HTTP {status}: {}", excerpt(body));

    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        return TaskError::Quota(detail);
    }
    match status {
        401 | 403 => TaskError::Auth(detail),
        402 => TaskError::Quota(detail),
        429 => TaskError::RateLimited(detail),
        _ if RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) => {
            TaskError::RateLimited(detail)
        }
        _ => TaskError::Transient(detail),
    }
}

/// Classify a transport-level failure (connect, timeout, decode).
pub fn classify_transport(err: &reqwest::Error) -> TaskError {
    if err.is_timeout() {
        TaskError::Transient(format!("request timed out: {err}"))
    } else {
        TaskError::Transient(format!("request failed: {err}"))
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_DETAIL_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_DETAIL_CHARS).collect();
    format!("{cut}...")
}
