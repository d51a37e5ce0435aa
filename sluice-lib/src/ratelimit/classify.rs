use http::{HeaderMap, StatusCode};
use serde_json::Value;
use std::time::{Duration, SystemTime};

use super::{BucketKey, BucketStore, headers, millis_since_epoch};
use crate::{ErrorKind, RawResponse, Response, Result};

/// Wait assumed when the server reports a limit without saying for how long.
pub(crate) const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

/// The rate-limit related headers of a single response.
/// Every field is optional on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// The response reports the server-wide limit
    pub global: bool,
    /// Requests left in the bucket
    pub remaining: Option<i64>,
    /// Bucket reset time in seconds since the Unix epoch
    pub reset: Option<f64>,
    /// Time to wait before retrying
    pub retry_after: Option<Duration>,
    /// Origin time of the response on the server's clock
    pub date: Option<SystemTime>,
}

impl RateLimitHeaders {
    /// Extract the rate-limit headers. Malformed values are logged and
    /// treated as absent.
    #[must_use]
    pub fn from_headers(map: &HeaderMap) -> Self {
        let retry_after = map
            .get(headers::RETRY_AFTER)
            .and_then(|value| match headers::parse_retry_after(value) {
                Ok(retry_after) => Some(retry_after),
                Err(e) => {
                    log::warn!("Ignoring malformed retry-after header: {e}");
                    None
                }
            });

        Self {
            global: headers::parse_global(map),
            remaining: headers::parse_remaining(map),
            reset: headers::parse_reset(map),
            retry_after,
            date: headers::parse_date(map),
        }
    }

    /// Distance in milliseconds between the server's and the local clock,
    /// measured at `now`. Zero if the server sent no date.
    #[must_use]
    pub fn latency_at(&self, now: SystemTime) -> i64 {
        self.date.map_or(0, |date| {
            (millis_since_epoch(now) - millis_since_epoch(date)).abs()
        })
    }

    /// Store what these headers disclose about the bucket `key`, as seen at `now`.
    pub fn record(&self, key: &BucketKey, buckets: &BucketStore, now: SystemTime) {
        let latency = self.latency_at(now);

        if self.global {
            let retry_after = self.retry_after.unwrap_or_else(|| {
                log::warn!(
                    "Global rate limit without retry-after, blocking all routes for {}ms",
                    FALLBACK_RETRY_AFTER.as_millis()
                );
                FALLBACK_RETRY_AFTER
            });
            buckets.update_global_at(retry_after, latency, millis_since_epoch(now));
        }

        if let (Some(remaining), Some(reset)) = (self.remaining, self.reset) {
            #[allow(clippy::cast_possible_truncation)]
            let reset_at = (reset * 1000.0) as i64 - latency;
            buckets.update(key.clone(), remaining, reset_at, latency);
        }
    }
}

/// Feed a response into the bucket store and map it to the reply for the
/// caller.
///
/// - `204 No Content` becomes [`Response::Empty`]
/// - any other `2xx` becomes [`Response::Body`] with the raw bytes
/// - everything else becomes [`ErrorKind::Api`] with the decoded error payload
///
/// Transport errors are passed through unchanged.
///
/// # Errors
///
/// Returns the transport error of `response`, or [`ErrorKind::Api`] for a
/// non-successful status code.
pub fn classify(
    response: Result<RawResponse>,
    key: &BucketKey,
    buckets: &BucketStore,
) -> Result<Response> {
    let response = response?;
    let mut limits = RateLimitHeaders::from_headers(&response.headers);

    let status = response.status;
    if status == StatusCode::NO_CONTENT {
        limits.record(key, buckets, SystemTime::now());
        Ok(Response::Empty)
    } else if status.is_success() {
        limits.record(key, buckets, SystemTime::now());
        Ok(Response::Body(response.body))
    } else {
        let payload = decode_error_payload(&response.body);
        // Rate-limit errors repeat the wait in their body
        if limits.retry_after.is_none() {
            limits.retry_after = retry_after(&payload);
        }
        limits.record(key, buckets, SystemTime::now());
        Err(ErrorKind::Api { status, payload })
    }
}

/// The `retry_after` field of a rate-limit error payload, in seconds.
pub(crate) fn retry_after(payload: &Value) -> Option<Duration> {
    match payload.get("retry_after")? {
        Value::Number(seconds) => seconds
            .as_f64()
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok()),
        Value::String(seconds) => headers::parse_retry_after_seconds(seconds.trim()),
        _ => None,
    }
}

/// Error payloads are JSON, but proxies in between may answer with plain text.
fn decode_error_payload(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
