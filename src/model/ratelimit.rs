//! Server rate-limit extraction from response headers.
//!
//! Recognizes `x-ratelimit-limit|remaining|reset`, the RFC `ratelimit-*`
//! family, and `retry-after`, all case-insensitive. Unparseable numeric
//! values are skipped rather than failing the call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Rate-limit figures reported by the server, when present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl RateLimitInfo {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset.is_none()
            && self.retry_after.is_none()
    }
}

fn lookup<'a>(headers: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    for (key, value) in headers {
        let key = key.to_ascii_lowercase();
        if names.iter().any(|n| key == *n) {
            return Some(value.as_str());
        }
    }
    None
}

fn parse_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

fn parse_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Extract whatever rate-limit figures the headers carry.
pub fn extract_rate_limit(headers: &HashMap<String, String>) -> RateLimitInfo {
    RateLimitInfo {
        limit: lookup(headers, &["x-ratelimit-limit", "ratelimit-limit"]).and_then(parse_u64),
        remaining: lookup(headers, &["x-ratelimit-remaining", "ratelimit-remaining"])
            .and_then(parse_u64),
        reset: lookup(headers, &["x-ratelimit-reset", "ratelimit-reset"]).and_then(parse_f64),
        retry_after: lookup(headers, &["retry-after"]).and_then(parse_f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_extracts_x_ratelimit_family() {
        let info = extract_rate_limit(&headers(&[
            ("X-RateLimit-Limit", "100"),
            ("X-RateLimit-Remaining", "42"),
            ("X-RateLimit-Reset", "12.5"),
        ]));
        assert_eq!(info.limit, Some(100));
        assert_eq!(info.remaining, Some(42));
        assert_eq!(info.reset, Some(12.5));
        assert_eq!(info.retry_after, None);
    }

    #[test]
    fn test_case_insensitive_and_retry_after() {
        let info = extract_rate_limit(&headers(&[("RETRY-AFTER", "30")]));
        assert_eq!(info.retry_after, Some(30.0));
    }

    #[test]
    fn test_bad_values_are_skipped() {
        let info = extract_rate_limit(&headers(&[
            ("x-ratelimit-limit", "not-a-number"),
            ("ratelimit-remaining", "7"),
        ]));
        assert_eq!(info.limit, None);
        assert_eq!(info.remaining, Some(7));
    }

    #[test]
    fn test_empty_headers() {
        assert!(extract_rate_limit(&HashMap::new()).is_empty());
    }
}
