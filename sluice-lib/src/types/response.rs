use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{ErrorKind, Result};

/// A successful reply from the remote API.
///
/// Bodies are handed out as raw bytes; decoding them is up to the caller,
/// who knows the expected shape. [`Response::json`] covers the common case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A `2xx` response with a body
    Body(Bytes),
    /// A `204 No Content` response
    Empty,
}

impl Response {
    /// The raw body, if there is one
    #[must_use]
    pub const fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Body(bytes) => Some(bytes),
            Self::Empty => None,
        }
    }

    /// Whether the API answered with `204 No Content`
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Decode the body as JSON
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::EmptyBody`] for a response without body and
    /// [`ErrorKind::Json`] if the body does not decode into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.bytes().ok_or(ErrorKind::EmptyBody)?;
        Ok(serde_json::from_slice(bytes)?)
    }
}
