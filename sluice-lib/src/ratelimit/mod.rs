//! Per-route rate limiting.
//!
//! The remote API groups routes into buckets and reports the state of each
//! bucket in the headers of every response. This module turns requests into
//! bucket keys and keeps track of what the server disclosed about them.
//!
//! # Architecture
//!
//! - [`BucketKey`]: Canonical identifier of a rate-limit scope
//! - [`normalize`]: Maps a method and a concrete route onto its [`BucketKey`]
//! - [`BucketStore`]: Concurrent store of the per-bucket state
//! - [`classify`]: Feeds a response into the store and maps it to a [`Result`]
//!
//! [`Result`]: crate::Result

mod bucket;
mod classify;
mod headers;
mod key;
mod route;

pub use bucket::{Bucket, BucketStore, GLOBAL_BUCKET, Readiness};
pub use classify::{RateLimitHeaders, classify};
pub use key::BucketKey;
pub use route::{DELETE_MARKER, MAJOR_PARAMETERS, normalize};

pub(crate) use classify::{FALLBACK_RETRY_AFTER, retry_after};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch according to the local clock.
pub(crate) fn now_millis() -> i64 {
    millis_since_epoch(SystemTime::now())
}

/// Milliseconds between the Unix epoch and `time`, negative for times
/// before the epoch.
pub(crate) fn millis_since_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}
