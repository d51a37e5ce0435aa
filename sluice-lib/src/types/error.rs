use http::StatusCode;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

/// Possible errors when talking to the remote API through `sluice_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The API answered with a status code other than `2xx`
    #[error("API responded with status {status}: {payload}")]
    Api {
        /// Status code of the response
        status: StatusCode,
        /// Decoded error payload. Plain-text payloads are kept as a JSON string.
        payload: serde_json::Value,
    },
    /// The request did not complete in time
    #[error("Request to the API timed out")]
    Timeout(#[source] reqwest::Error),
    /// The connection to the API could not be established
    #[error("Connection to the API is down")]
    ConnectionDown(#[source] reqwest::Error),
    /// Any other network error, including a failed replay after the
    /// connection was closed mid-request
    #[error("Network error while talking to the API")]
    Network(#[source] reqwest::Error),
    /// The underlying HTTP client could not be built
    #[error("Failed to build the HTTP client")]
    BuildClient(#[source] reqwest::Error),
    /// The dispatcher stopped before the request could be answered
    #[error("The dispatcher is no longer running")]
    DispatcherClosed,
    /// A base URL and route which do not form a valid URL
    #[error("Cannot parse `{0}` as a URL")]
    InvalidUrl(String, #[source] url::ParseError),
    /// The given header could not be parsed.
    /// A possible error when converting a `HeaderValue` from a string or byte
    /// slice.
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// The given header name is not valid
    #[error("Header name could not be parsed.")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// No credential was configured
    #[error("No API token specified. Use the `token` setting or the `SLUICE_TOKEN` env var.")]
    MissingToken,
    /// A request or response body could not be encoded or decoded
    #[error("Cannot encode or decode JSON")]
    Json(#[from] serde_json::Error),
    /// A body was expected, but the API answered with `204 No Content`
    #[error("Response has no body")]
    EmptyBody,
    /// The configuration file could not be read
    #[error("Cannot read configuration file `{}`", .0.display())]
    ReadConfig(PathBuf, #[source] std::io::Error),
    /// The configuration file is not valid TOML or has unknown keys
    #[error("Cannot parse configuration file")]
    ParseConfig(#[from] toml::de::Error),
}

impl ErrorKind {
    /// Map an error of the HTTP client onto the transport error it represents
    #[must_use]
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else if error.is_connect() {
            Self::ConnectionDown(error)
        } else {
            Self::Network(error)
        }
    }

    /// Whether this error happened below the API, i.e. no response was
    /// received for the request
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ConnectionDown(_) | Self::Network(_) | Self::DispatcherClosed
        )
    }

    /// The status code of an [`ErrorKind::Api`] error
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Return the underlying source of the given [`ErrorKind`]
    /// if it is a `reqwest::Error`.
    #[must_use]
    pub const fn reqwest_error(&self) -> Option<&reqwest::Error> {
        match self {
            Self::Timeout(e) | Self::ConnectionDown(e) | Self::Network(e) | Self::BuildClient(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ErrorKind {
    fn from(error: reqwest::Error) -> Self {
        Self::from_transport(error)
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_display() {
        let error = ErrorKind::Api {
            status: StatusCode::NOT_FOUND,
            payload: json!({"message": "Unknown Channel", "code": 10003}),
        };
        assert_eq!(
            error.to_string(),
            r#"API responded with status 404 Not Found: {"code":10003,"message":"Unknown Channel"}"#
        );
        assert_eq!(error.status(), Some(StatusCode::NOT_FOUND));
        assert!(!error.is_transport());
    }

    #[test]
    fn test_transport_errors() {
        assert!(ErrorKind::DispatcherClosed.is_transport());
        assert!(!ErrorKind::MissingToken.is_transport());
        assert_eq!(ErrorKind::EmptyBody.status(), None);
    }

    #[test]
    fn test_serialize_uses_display() {
        let serialized = serde_json::to_string(&ErrorKind::DispatcherClosed).unwrap();
        assert_eq!(serialized, r#""The dispatcher is no longer running""#);
    }
}
