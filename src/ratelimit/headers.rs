//! Rendering of decisions as response headers.

use std::time::Duration;

use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::HeaderMap;

use super::counter::WindowKind;
use super::limiter::{Decision, WindowStatus};
use super::rules::Limit;

pub const AUTH_METHOD: HeaderName = HeaderName::from_static("x-auth-method");
pub const RATELIMIT_GROUP: HeaderName = HeaderName::from_static("x-ratelimit-group");
pub const RATELIMIT_LIMIT_PER_SECOND: HeaderName =
    HeaderName::from_static("x-ratelimit-limit-per-second");
pub const RATELIMIT_LIMIT_PER_MINUTE: HeaderName =
    HeaderName::from_static("x-ratelimit-limit-per-minute");
pub const RATELIMIT_CURRENT_PER_SECOND: HeaderName =
    HeaderName::from_static("x-ratelimit-current-per-second");
pub const RATELIMIT_CURRENT_PER_MINUTE: HeaderName =
    HeaderName::from_static("x-ratelimit-current-per-minute");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const BANDWIDTH_LIMIT_UPLOAD: HeaderName =
    HeaderName::from_static("x-bandwidth-limit-upload");
pub const BANDWIDTH_LIMIT_DOWNLOAD: HeaderName =
    HeaderName::from_static("x-bandwidth-limit-download");

/// Render a decision as headers for the response to the client.
///
/// `X-RateLimit-Remaining` and `X-RateLimit-Reset` describe the binding
/// window: the denied one, or otherwise the enforced window closest to its
/// limit. `Retry-After` is only present on denials.
pub fn rate_limit_headers(decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(AUTH_METHOD, HeaderValue::from_static(decision.auth_method.as_str()));
    if let Ok(group) = HeaderValue::from_str(&decision.tier) {
        headers.insert(RATELIMIT_GROUP, group);
    }

    if let Some(second) = decision.window(WindowKind::Second) {
        headers.insert(RATELIMIT_LIMIT_PER_SECOND, limit_value(second.limit));
        headers.insert(RATELIMIT_CURRENT_PER_SECOND, HeaderValue::from(second.current));
    }
    if let Some(minute) = decision.window(WindowKind::Minute) {
        headers.insert(RATELIMIT_LIMIT_PER_MINUTE, limit_value(minute.limit));
        headers.insert(RATELIMIT_CURRENT_PER_MINUTE, HeaderValue::from(minute.current));
    }

    match binding_window(decision) {
        Some(status) => {
            headers.insert(RATELIMIT_REMAINING, remaining_value(status.remaining));
            headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(status.reset_in)));
        }
        None => {
            headers.insert(RATELIMIT_REMAINING, HeaderValue::from_static("unlimited"));
            headers.insert(RATELIMIT_RESET, HeaderValue::from(0u64));
        }
    }

    if let Some(bytes_in) = decision.window(WindowKind::BytesIn) {
        headers.insert(BANDWIDTH_LIMIT_UPLOAD, limit_value(bytes_in.limit));
    }
    if let Some(bytes_out) = decision.window(WindowKind::BytesOut) {
        headers.insert(BANDWIDTH_LIMIT_DOWNLOAD, limit_value(bytes_out.limit));
    }

    if let Some(denial) = decision.denial() {
        let wait = ceil_secs(denial.retry_after).max(1);
        headers.insert(RETRY_AFTER, HeaderValue::from(wait));
    }

    headers
}

fn binding_window(decision: &Decision) -> Option<&WindowStatus> {
    if let Some(denial) = decision.denial() {
        return decision.window(denial.window);
    }
    decision
        .windows
        .iter()
        .filter(|status| status.enforced)
        .filter_map(|status| status.remaining.map(|remaining| (remaining, status)))
        .min_by_key(|(remaining, status)| (*remaining, status.window))
        .map(|(_, status)| status)
}

fn limit_value(limit: Limit) -> HeaderValue {
    match limit {
        Limit::Unlimited => HeaderValue::from_static("unlimited"),
        Limit::Max(max) => HeaderValue::from(max),
    }
}

fn remaining_value(remaining: Option<u64>) -> HeaderValue {
    match remaining {
        Some(remaining) => HeaderValue::from(remaining),
        None => HeaderValue::from_static("unlimited"),
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::identity::{AuthMethod, Identifier};
    use crate::ratelimit::limiter::{Denial, DenyReason, Verdict};
    use std::sync::Arc;

    fn status(window: WindowKind, limit: Limit, current: u64, reset_ms: u64) -> WindowStatus {
        WindowStatus {
            window,
            limit,
            current,
            remaining: limit.remaining(current),
            reset_in: Duration::from_millis(reset_ms),
            enforced: !window.counts_bytes(),
        }
    }

    fn decision(verdict: Verdict) -> Decision {
        Decision {
            verdict,
            identifier: Identifier::from("ABCD1234"),
            auth_method: AuthMethod::V4Header,
            tier: Arc::from("premium"),
            config_version: 3,
            windows: vec![
                status(WindowKind::Second, Limit::Max(50), 4, 300),
                status(WindowKind::Minute, Limit::Max(1000), 990, 42_500),
                status(WindowKind::BytesIn, Limit::Unlimited, 0, 0),
                status(WindowKind::BytesOut, Limit::Max(1_048_576), 0, 0),
            ],
        }
    }

    fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
        headers.get(name).unwrap().to_str().unwrap()
    }

    #[test]
    fn test_allowed_headers() {
        let headers = rate_limit_headers(&decision(Verdict::Allow));

        assert_eq!(header(&headers, "X-Auth-Method"), "v4_header");
        assert_eq!(header(&headers, "X-RateLimit-Group"), "premium");
        assert_eq!(header(&headers, "X-RateLimit-Limit-Per-Second"), "50");
        assert_eq!(header(&headers, "X-RateLimit-Limit-Per-Minute"), "1000");
        assert_eq!(header(&headers, "X-RateLimit-Current-Per-Second"), "4");
        assert_eq!(header(&headers, "X-RateLimit-Current-Per-Minute"), "990");
        // minute has 10 left, second has 46
        assert_eq!(header(&headers, "X-RateLimit-Remaining"), "10");
        assert_eq!(header(&headers, "X-RateLimit-Reset"), "43");
        assert_eq!(header(&headers, "X-Bandwidth-Limit-Upload"), "unlimited");
        assert_eq!(header(&headers, "X-Bandwidth-Limit-Download"), "1048576");
        assert!(headers.get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_denied_headers_carry_retry_after() {
        let headers = rate_limit_headers(&decision(Verdict::Deny(Denial {
            reason: DenyReason::LimitExceeded,
            window: WindowKind::Second,
            limit: Limit::Max(50),
            retry_after: Duration::from_millis(300),
        })));

        assert_eq!(header(&headers, "Retry-After"), "1");
        assert_eq!(header(&headers, "X-RateLimit-Remaining"), "46");
        assert_eq!(header(&headers, "X-RateLimit-Reset"), "1");
    }

    #[test]
    fn test_unlimited_tier_headers() {
        let mut d = decision(Verdict::Allow);
        for status in &mut d.windows {
            status.limit = Limit::Unlimited;
            status.remaining = None;
        }

        let headers = rate_limit_headers(&d);
        assert_eq!(header(&headers, "X-RateLimit-Remaining"), "unlimited");
        assert_eq!(header(&headers, "X-RateLimit-Limit-Per-Minute"), "unlimited");
        assert_eq!(header(&headers, "X-RateLimit-Reset"), "0");
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(2)), 2);
    }
}
