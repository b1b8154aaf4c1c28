use std::time::Duration;

use chrono::{DateTime, Utc};

pub use rook_core::truncate_for_error;

const MAX_RETRY_DELAY_MS: u64 = 30_000;

pub fn is_retryable_github_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

pub fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at
        .signed_duration_since(Utc::now())
        .num_milliseconds()
        .max(0);
    Some(Duration::from_millis(u64::try_from(delay_ms).ok()?))
}

/// Exponential delay for 1-based `attempt`, never shorter than `Retry-After`.
pub fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after: Option<Duration>) -> Duration {
    let shift = attempt.saturating_sub(1).min(10) as u32;
    let backoff_ms = base_delay_ms
        .saturating_mul(1_u64 << shift)
        .min(MAX_RETRY_DELAY_MS);
    let backoff = Duration::from_millis(backoff_ms);
    match retry_after {
        Some(retry_after) => backoff.max(retry_after),
        None => backoff,
    }
}
