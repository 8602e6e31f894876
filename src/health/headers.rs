//! Rate-limit header normalization
//!
//! Providers report capacity in different dialects:
//!
//! | Dialect | Headers |
//! |---|---|
//! | OpenAI / Groq / Moonshot | `x-ratelimit-{remaining,limit,reset}-{requests,tokens}` |
//! | Anthropic | `anthropic-ratelimit-{requests,tokens}-{remaining,limit,reset}` |
//! | Rejections | `retry-after` |
//!
//! Reset values arrive as compound durations (`2m59.56s`, `6ms`), ISO-8601
//! timestamps, or plain seconds. Anything else falls back to a fixed default;
//! parsing never fails.

use super::ResourceCounters;
use chrono::DateTime;
use std::collections::HashMap;

/// Extract rate-limit counters from response headers
///
/// Header names are matched case-insensitively. A dialect that is absent
/// yields empty counters ("no metadata").
pub fn parse_rate_limit_headers<'a, I>(headers: I, now: i64, default_reset: u64) -> ResourceCounters
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let headers: HashMap<String, &str> = headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();

    let names = if headers
        .keys()
        .any(|name| name.starts_with("anthropic-ratelimit-"))
    {
        DialectNames::anthropic()
    } else {
        DialectNames::openai()
    };

    let mut counters = ResourceCounters::new();
    if let Some((remaining, limit)) = window(&headers, names.requests_remaining, names.requests_limit)
    {
        counters = counters.with_requests(remaining, limit);
    }
    if let Some((remaining, limit)) = window(&headers, names.tokens_remaining, names.tokens_limit) {
        counters = counters.with_tokens(remaining, limit);
    }

    // The later of the two resets governs recovery
    let reset = [names.requests_reset, names.tokens_reset]
        .iter()
        .filter_map(|name| headers.get(*name))
        .map(|value| parse_reset_duration(value, now, default_reset))
        .max();
    if let Some(reset) = reset {
        counters = counters.with_reset_after(reset);
    }

    counters
}

/// Read a `retry-after` header, if present
pub fn parse_retry_after<'a, I>(headers: I, now: i64, default_reset: u64) -> Option<u64>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .map(|(_, value)| parse_reset_duration(value, now, default_reset))
}

/// Parse a reset value into whole seconds from `now`, at least 1
///
/// Accepts ISO-8601/RFC 3339 and RFC 2822 timestamps, plain (possibly
/// fractional) seconds, and compound `h`/`m`/`s`/`ms` durations.
/// Unrecognized input returns `default_reset`.
pub fn parse_reset_duration(raw: &str, now: i64, default_reset: u64) -> u64 {
    let value = raw.trim();
    if value.is_empty() {
        return default_reset;
    }

    if value.contains('T') {
        if let Ok(at) = DateTime::parse_from_rfc3339(value) {
            return seconds_from(at.timestamp(), now);
        }
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return seconds_from(at.timestamp(), now);
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return ceil_seconds(seconds);
        }
        return default_reset;
    }
    match parse_compound_duration(value) {
        Some(seconds) => ceil_seconds(seconds),
        None => {
            tracing::debug!(
                reset_value = %value,
                default_reset_seconds = default_reset,
                "Unrecognized reset format, using default"
            );
            default_reset
        }
    }
}

fn seconds_from(at: i64, now: i64) -> u64 {
    u64::try_from(at.saturating_sub(now).max(1)).unwrap_or(1)
}

fn ceil_seconds(seconds: f64) -> u64 {
    (seconds.ceil() as u64).max(1)
}

/// Parse strings like `1h2m3s`, `2m59.56s`, `6ms`
fn parse_compound_duration(value: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut rest = value;
    let mut parsed_any = false;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let multiplier = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            _ => return None,
        };
        rest = &rest[unit_len..];

        total += number * multiplier;
        parsed_any = true;
    }

    parsed_any.then_some(total)
}

fn window(headers: &HashMap<String, &str>, remaining: &str, limit: &str) -> Option<(u64, u64)> {
    let remaining = parse_count(headers.get(remaining)?)?;
    let limit = parse_count(headers.get(limit)?)?;
    Some((remaining, limit))
}

fn parse_count(value: &str) -> Option<u64> {
    if let Ok(count) = value.parse::<u64>() {
        return Some(count);
    }
    let count = value.parse::<f64>().ok()?;
    (count.is_finite() && count >= 0.0).then_some(count as u64)
}

struct DialectNames {
    requests_remaining: &'static str,
    requests_limit: &'static str,
    requests_reset: &'static str,
    tokens_remaining: &'static str,
    tokens_limit: &'static str,
    tokens_reset: &'static str,
}

impl DialectNames {
    fn openai() -> Self {
        Self {
            requests_remaining: "x-ratelimit-remaining-requests",
            requests_limit: "x-ratelimit-limit-requests",
            requests_reset: "x-ratelimit-reset-requests",
            tokens_remaining: "x-ratelimit-remaining-tokens",
            tokens_limit: "x-ratelimit-limit-tokens",
            tokens_reset: "x-ratelimit-reset-tokens",
        }
    }

    fn anthropic() -> Self {
        Self {
            requests_remaining: "anthropic-ratelimit-requests-remaining",
            requests_limit: "anthropic-ratelimit-requests-limit",
            requests_reset: "anthropic-ratelimit-requests-reset",
            tokens_remaining: "anthropic-ratelimit-tokens-remaining",
            tokens_limit: "anthropic-ratelimit-tokens-limit",
            tokens_reset: "anthropic-ratelimit-tokens-reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthBucket;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_compound_duration_strings() {
        assert_eq!(parse_reset_duration("2m59s", NOW, 60), 179);
        assert_eq!(parse_reset_duration("2m59.56s", NOW, 60), 180);
        assert_eq!(parse_reset_duration("1h", NOW, 60), 3600);
        assert_eq!(parse_reset_duration("7.66s", NOW, 60), 8);
        assert_eq!(parse_reset_duration("6ms", NOW, 60), 1);
    }

    #[test]
    fn test_plain_seconds() {
        assert_eq!(parse_reset_duration("30", NOW, 60), 30);
        assert_eq!(parse_reset_duration(" 0.2 ", NOW, 60), 1);
        assert_eq!(parse_reset_duration("0", NOW, 60), 1);
    }

    #[test]
    fn test_iso_timestamp_is_relative_to_now() {
        // 2023-11-14T22:13:20Z is NOW
        assert_eq!(parse_reset_duration("2023-11-14T22:13:50Z", NOW, 60), 30);
        assert_eq!(parse_reset_duration("2023-11-14T22:13:50+00:00", NOW, 60), 30);
        // Already passed
        assert_eq!(parse_reset_duration("2023-11-14T22:00:00Z", NOW, 60), 1);
    }

    #[test]
    fn test_unrecognized_uses_default() {
        assert_eq!(parse_reset_duration("soon", NOW, 60), 60);
        assert_eq!(parse_reset_duration("", NOW, 45), 45);
        assert_eq!(parse_reset_duration("5 fortnights", NOW, 60), 60);
        assert_eq!(parse_reset_duration("-3", NOW, 60), 60);
        assert_eq!(parse_reset_duration("2023-13-99T99:99Z", NOW, 60), 60);
    }

    #[test]
    fn test_openai_dialect() {
        let headers = [
            ("x-ratelimit-remaining-requests", "3"),
            ("x-ratelimit-limit-requests", "100"),
            ("X-RateLimit-Remaining-Tokens", "90000"),
            ("x-ratelimit-limit-tokens", "100000"),
            ("x-ratelimit-reset-requests", "2m59.56s"),
            ("x-ratelimit-reset-tokens", "6ms"),
        ];
        let counters = parse_rate_limit_headers(headers, NOW, 60);
        assert_eq!(counters.bucket(), HealthBucket::Red);
        assert_eq!(counters.requests().map(|w| w.remaining()), Some(3));
        assert_eq!(counters.tokens().map(|w| w.limit()), Some(100_000));
        assert_eq!(counters.reset_after_seconds(), Some(180));
    }

    #[test]
    fn test_anthropic_dialect() {
        let headers = [
            ("anthropic-ratelimit-requests-remaining", "45"),
            ("anthropic-ratelimit-requests-limit", "50"),
            ("anthropic-ratelimit-tokens-remaining", "8000"),
            ("anthropic-ratelimit-tokens-limit", "80000"),
            ("anthropic-ratelimit-tokens-reset", "2023-11-14T22:14:20Z"),
        ];
        let counters = parse_rate_limit_headers(headers, NOW, 60);
        assert_eq!(counters.bucket(), HealthBucket::Yellow);
        assert_eq!(counters.reset_after_seconds(), Some(60));
    }

    #[test]
    fn test_no_metadata_is_empty() {
        let headers = [("content-type", "application/json")];
        let counters = parse_rate_limit_headers(headers, NOW, 60);
        assert!(counters.is_empty());
        assert_eq!(counters.bucket(), HealthBucket::Green);
        assert_eq!(counters.reset_after_seconds(), None);
    }

    #[test]
    fn test_window_needs_both_values() {
        let headers = [("x-ratelimit-remaining-requests", "3")];
        assert!(parse_rate_limit_headers(headers, NOW, 60).is_empty());
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(
            parse_retry_after([("Retry-After", "30")], NOW, 60),
            Some(30)
        );
        assert_eq!(
            parse_retry_after([("retry-after", "Tue, 14 Nov 2023 22:14:00 GMT")], NOW, 60),
            Some(40)
        );
        assert_eq!(parse_retry_after([("x-other", "1")], NOW, 60), None);
    }
}
