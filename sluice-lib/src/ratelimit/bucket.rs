use dashmap::DashMap;
use std::time::Duration;

use super::{BucketKey, now_millis};

/// Key of the bucket tracking the server-wide limit, which applies
/// independently of the route.
pub const GLOBAL_BUCKET: &str = "GLOBAL";

/// What the server last disclosed about a bucket.
///
/// All times are milliseconds since the Unix epoch on the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Requests left before the bucket is exhausted
    pub remaining: i64,
    /// When the bucket resets, already compensated for clock skew
    pub reset_at: i64,
    /// Estimated delay between the server and the local clock
    pub latency: i64,
}

impl Bucket {
    /// Time to wait before this bucket admits another request at `now`.
    fn wait_at(&self, now: i64) -> i64 {
        if self.remaining > 0 {
            0
        } else {
            (self.reset_at - now).max(0)
        }
    }
}

/// Whether a request may be sent right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The request may be sent immediately
    Now,
    /// The request has to wait for the given duration first
    Wait(Duration),
}

fn readiness(wait: i64) -> Readiness {
    match wait {
        ..=0 => Readiness::Now,
        #[allow(clippy::cast_sign_loss)]
        wait => Readiness::Wait(Duration::from_millis(wait as u64)),
    }
}

/// Concurrent store of the rate-limit state of every known bucket.
///
/// Entries are only ever created from server responses. The map is sharded,
/// so readers and writers of unrelated keys never contend on the same lock,
/// while writes to one key are serialized by its shard. A readiness check
/// and the quota it takes happen under the same shard lock, so concurrent
/// requests never overdraw what the server disclosed.
///
/// Expired entries are not removed on read. Call [`BucketStore::sweep`]
/// periodically to bound the size of the store.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: DashMap<BucketKey, Bucket>,
}

impl BucketStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a request for `key` may be sent now, and if so, take
    /// one request from the quota of its bucket.
    ///
    /// Both the bucket of `key` and the [`GLOBAL_BUCKET`] are consulted,
    /// and the longer of the two waits wins. Quota is only taken when the
    /// request may actually go out, and only from a bucket the server told
    /// us about. Unknown keys are always ready.
    #[must_use]
    pub fn time_until_ready(&self, key: &BucketKey) -> Readiness {
        self.time_until_ready_at(key, now_millis())
    }

    /// Like [`BucketStore::time_until_ready`], evaluated at `now`
    /// (milliseconds since the Unix epoch).
    #[must_use]
    pub fn time_until_ready_at(&self, key: &BucketKey, now: i64) -> Readiness {
        let global = self.wait_for(&BucketKey::from(GLOBAL_BUCKET), now);

        // The shard of `key` stays locked between check and decrement
        let route = self.buckets.get_mut(key).map_or(0, |mut bucket| {
            let wait = bucket.wait_at(now);
            if wait == 0 && global == 0 && bucket.remaining > 0 {
                bucket.remaining -= 1;
            }
            wait
        });

        readiness(route.max(global))
    }

    /// Like [`BucketStore::time_until_ready`], but leaves the quota untouched.
    #[must_use]
    pub fn peek(&self, key: &BucketKey) -> Readiness {
        self.peek_at(key, now_millis())
    }

    /// Like [`BucketStore::peek`], evaluated at `now`
    /// (milliseconds since the Unix epoch).
    #[must_use]
    pub fn peek_at(&self, key: &BucketKey, now: i64) -> Readiness {
        let global = self.wait_for(&BucketKey::from(GLOBAL_BUCKET), now);
        readiness(self.wait_for(key, now).max(global))
    }

    fn wait_for(&self, key: &BucketKey, now: i64) -> i64 {
        self.buckets
            .get(key)
            .map_or(0, |bucket| bucket.wait_at(now))
    }

    /// Create or overwrite the bucket for `key`. The last write wins.
    ///
    /// `reset_at` must already be compensated for `latency`.
    pub fn update(&self, key: BucketKey, remaining: i64, reset_at: i64, latency: i64) {
        log::trace!("Bucket {key}: {remaining} remaining, resets at {reset_at}");
        self.buckets.insert(
            key,
            Bucket {
                remaining,
                reset_at,
                latency,
            },
        );
    }

    /// Exhaust the [`GLOBAL_BUCKET`] until `retry_after` has passed.
    pub fn update_global(&self, retry_after: Duration, latency: i64) {
        self.update_global_at(retry_after, latency, now_millis());
    }

    /// Like [`BucketStore::update_global`], evaluated at `now`
    /// (milliseconds since the Unix epoch).
    pub fn update_global_at(&self, retry_after: Duration, latency: i64, now: i64) {
        let retry_after = i64::try_from(retry_after.as_millis()).unwrap_or(i64::MAX);
        let reset_at = now.saturating_add(retry_after) - latency;
        log::debug!("Global rate limit hit, blocking all routes for {retry_after}ms");
        self.update(BucketKey::from(GLOBAL_BUCKET), 0, reset_at, latency);
    }

    /// Remove every bucket whose reset time has passed.
    /// Returns the number of removed buckets.
    pub fn sweep(&self) -> usize {
        self.sweep_at(now_millis())
    }

    /// Like [`BucketStore::sweep`], evaluated at `now`
    /// (milliseconds since the Unix epoch).
    pub fn sweep_at(&self, now: i64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.reset_at > now);
        let removed = before.saturating_sub(self.buckets.len());
        log::debug!("Swept {removed} expired rate-limit buckets");
        removed
    }

    /// Remove all buckets
    pub fn clear(&self) {
        self.buckets.clear();
    }

    /// Get a copy of the bucket for `key`, if the server disclosed one
    #[must_use]
    pub fn get(&self, key: &BucketKey) -> Option<Bucket> {
        self.buckets.get(key).map(|bucket| *bucket)
    }

    /// Number of buckets currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no bucket is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
