use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;

/// Retries after the first attempt; three sends at most.
pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 2;
pub(crate) const RETRY_BACKOFF_BASE_MS: u64 = 100;
pub(crate) const RETRY_BACKOFF_MAX_MS: u64 = 1_000;
pub(crate) const RETRY_AFTER_MAX_SECS: u64 = 30;

/// Statuses the upstream uses for "busy, try again".
#[inline]
pub(crate) fn should_retry_upstream_status(status: http::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 503 | 529)
}

/// Only failures that happen before the request reached the upstream are
/// retried; anything later may already have been processed.
#[inline]
pub(crate) fn should_retry_transport_error(err: &reqwest::Error) -> bool {
    err.is_connect()
}

#[inline]
pub(crate) fn retry_backoff_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.min(10);
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(multiplier)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}

#[inline]
pub(crate) fn retry_delay(headers: &http::HeaderMap, attempt: u32) -> Duration {
    parse_retry_after_delay(headers).unwrap_or_else(|| retry_backoff_delay(attempt))
}

/// `Retry-After` as delta-seconds or an HTTP date, capped.
pub(crate) fn parse_retry_after_delay(headers: &http::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    let cap = Duration::from_secs(RETRY_AFTER_MAX_SECS);

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(cap));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_upstream_status() {
        assert!(should_retry_upstream_status(
            http::StatusCode::TOO_MANY_REQUESTS
        ));
        assert!(should_retry_upstream_status(
            http::StatusCode::SERVICE_UNAVAILABLE
        ));
        assert!(should_retry_upstream_status(
            http::StatusCode::from_u16(529).unwrap()
        ));
        assert!(!should_retry_upstream_status(http::StatusCode::BAD_REQUEST));
        assert!(!should_retry_upstream_status(
            http::StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(retry_backoff_delay(0), Duration::from_millis(100));
        assert_eq!(retry_backoff_delay(1), Duration::from_millis(200));
        assert_eq!(retry_backoff_delay(9), Duration::from_millis(1_000));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("5"));
        assert_eq!(
            parse_retry_after_delay(&headers),
            Some(Duration::from_secs(5))
        );

        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("3600"));
        assert_eq!(
            parse_retry_after_delay(&headers),
            Some(Duration::from_secs(RETRY_AFTER_MAX_SECS))
        );
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let target = SystemTime::now() + Duration::from_secs(2);
        let mut headers = http::HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            http::HeaderValue::from_str(&httpdate::fmt_http_date(target)).unwrap(),
        );
        let delay = parse_retry_after_delay(&headers).unwrap();
        assert!(delay <= Duration::from_secs(RETRY_AFTER_MAX_SECS));
    }

    #[test]
    fn test_invalid_retry_after_falls_back_to_backoff() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("not-a-delay"));
        assert!(parse_retry_after_delay(&headers).is_none());
        assert_eq!(retry_delay(&headers, 1), retry_backoff_delay(1));
    }
}
