//! Parsing of the rate-limit headers sent by the remote API.
//! Every header is optional, and a malformed value is treated like a
//! missing one instead of failing the response.

use http::{HeaderMap, HeaderValue};
use std::time::{Duration, SystemTime};
use thiserror::Error;

pub(crate) const GLOBAL: &str = "x-ratelimit-global";
pub(crate) const REMAINING: &str = "x-ratelimit-remaining";
pub(crate) const RESET: &str = "x-ratelimit-reset";
pub(crate) const RETRY_AFTER: &str = "retry-after";

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RetryAfterParseError {
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// Parse the "Retry-After" header.
///
/// The remote API sends fractional seconds (`"1.337"`), but plain integer
/// seconds and an HTTP date as per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3)
/// are accepted as well.
pub(crate) fn parse_retry_after(value: &HeaderValue) -> Result<Duration, RetryAfterParseError> {
    let value = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?
        .trim();

    parse_retry_after_seconds(value).or_else(|| {
        httpdate::parse_http_date(value)
            .ok()
            .map(|s| {
                s.duration_since(SystemTime::now())
                    // if date is in the past, we can use ZERO
                    .unwrap_or(Duration::ZERO)
            })
    })
    .ok_or_else(|| RetryAfterParseError::ValueError(value.into()))
}

/// Parse a non-negative number of seconds, with or without a fractional part.
pub(crate) fn parse_retry_after_seconds(value: &str) -> Option<Duration> {
    // Integers first, so whole seconds never go through float rounding
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    value
        .parse::<f64>()
        .ok()
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
}

/// Whether the response reports the server-wide limit. Only the presence of
/// the header matters, not its value.
pub(crate) fn parse_global(headers: &HeaderMap) -> bool {
    headers.contains_key(GLOBAL)
}

/// Requests left in the bucket of the response.
pub(crate) fn parse_remaining(headers: &HeaderMap) -> Option<i64> {
    parse_str(headers, REMAINING).and_then(|value| value.parse::<i64>().ok())
}

/// Reset time of the bucket of the response, in (fractional) seconds since
/// the Unix epoch.
pub(crate) fn parse_reset(headers: &HeaderMap) -> Option<f64> {
    parse_str(headers, RESET)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|reset| reset.is_finite())
}

/// The "Date" header, i.e. the origin time of the response on the server's clock.
pub(crate) fn parse_date(headers: &HeaderMap) -> Option<SystemTime> {
    parse_str(headers, http::header::DATE.as_str())
        .and_then(|value| httpdate::parse_http_date(value).ok())
}

fn parse_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use http::{HeaderMap, HeaderValue};

    use super::*;

    #[test]
    fn test_retry_after() {
        assert_eq!(parse_retry_after(&value("1")), Ok(Duration::from_secs(1)));
        assert_eq!(
            parse_retry_after(&value("1.5")),
            Ok(Duration::from_millis(1_500))
        );
        assert_eq!(
            parse_retry_after(&value("0.25")),
            Ok(Duration::from_millis(250))
        );
        assert_eq!(
            parse_retry_after(&value("-1")),
            Err(RetryAfterParseError::ValueError("-1".into()))
        );
        assert_eq!(
            parse_retry_after(&value("soon")),
            Err(RetryAfterParseError::ValueError("soon".into()))
        );

        assert_eq!(
            parse_retry_after(&value("Fri, 15 May 2015 15:34:21 GMT")),
            Ok(Duration::ZERO)
        );

        let result = parse_retry_after(&value("Fri, 15 May 4099 15:34:21 GMT"));
        let is_in_future = matches!(result, Ok(d) if d.as_secs() > 0);
        assert!(is_in_future);
    }

    #[test]
    fn test_missing_headers() {
        let headers = HeaderMap::new();
        assert!(!parse_global(&headers));
        assert_eq!(parse_remaining(&headers), None);
        assert_eq!(parse_reset(&headers), None);
        assert_eq!(parse_date(&headers), None);
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(GLOBAL, value("true"));
        headers.insert(REMAINING, value("4"));
        headers.insert(RESET, value("1470173023.123"));
        headers.insert(http::header::DATE, value("Sun, 06 Nov 1994 08:49:37 GMT"));

        assert!(parse_global(&headers));
        assert_eq!(parse_remaining(&headers), Some(4));
        assert_eq!(parse_reset(&headers), Some(1_470_173_023.123));
        assert_eq!(
            parse_date(&headers),
            Some(UNIX_EPOCH + Duration::from_secs(784_111_777))
        );
    }

    #[test]
    fn test_malformed_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(REMAINING, value("many"));
        headers.insert(RESET, value("tomorrow"));
        headers.insert(http::header::DATE, value("yesterday"));

        assert_eq!(parse_remaining(&headers), None);
        assert_eq!(parse_reset(&headers), None);
        assert_eq!(parse_date(&headers), None);
    }

    #[test]
    fn test_reset_without_fraction() {
        let mut headers = HeaderMap::new();
        headers.insert(RESET, value("1470173023"));
        assert_eq!(parse_reset(&headers), Some(1_470_173_023.0));
    }

    #[test]
    fn test_date_is_in_the_past() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::DATE,
            value(&httpdate::fmt_http_date(SystemTime::now())),
        );
        let date = parse_date(&headers).unwrap();
        assert!(date <= SystemTime::now());
    }

    fn value(v: &str) -> HeaderValue {
        HeaderValue::from_str(v).unwrap()
    }
}
