use serde::Deserialize;
use std::fmt;

/// A type-safe representation of a rate-limit scope.
///
/// Two requests with the same key share the same quota. Keys are produced
/// by [`normalize`](crate::ratelimit::normalize); constructing one by hand is
/// mostly useful for inspecting a [`BucketStore`](crate::BucketStore).
///
/// # Examples
///
/// ```
/// use http::Method;
/// use sluice_lib::ratelimit::{BucketKey, normalize};
///
/// let key = normalize("/channels/381870553235193857/messages", &Method::GET);
/// assert_eq!(key, BucketKey::from("/channels/381870553235193857/messages"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct BucketKey(String);

impl BucketKey {
    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BucketKey {
    fn from(key: String) -> Self {
        BucketKey(key)
    }
}

impl From<&str> for BucketKey {
    fn from(key: &str) -> Self {
        BucketKey(key.to_string())
    }
}

impl AsRef<str> for BucketKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
