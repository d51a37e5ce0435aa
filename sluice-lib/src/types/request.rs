use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;

use crate::Result;

/// Body of a [`Request`], encoded once when the request is built so that a
/// retried request sends exactly the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    /// No body at all
    #[default]
    Empty,
    /// A JSON document
    Json(Bytes),
    /// A pre-encoded multipart payload
    Multipart {
        /// Full content type, including the boundary
        content_type: String,
        /// The encoded parts
        bytes: Bytes,
    },
}

/// A request to the remote API.
///
/// The route is the path below the base URL with all IDs filled in, e.g.
/// `/channels/381870553235193857/messages`. A request is never modified once
/// it was submitted and may be sent more than once.
///
/// # Examples
///
/// ```
/// use sluice_lib::Request;
///
/// let request = Request::post("/channels/381870553235193857/messages")
///     .json(&serde_json::json!({"content": "hello"}))
///     .unwrap()
///     .query("wait", "true");
/// assert_eq!(request.params, vec![("wait".to_string(), "true".to_string())]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Path below the base URL, starting with `/`
    pub route: String,
    /// Request body
    pub body: RequestBody,
    /// Extra headers for this request only
    pub headers: HeaderMap,
    /// Query parameters, URL-encoded when the request is sent
    pub params: Vec<(String, String)>,
}

impl Request {
    /// Create a request without body, headers or query parameters
    #[must_use]
    pub fn new(method: Method, route: impl Into<String>) -> Self {
        Self {
            method,
            route: route.into(),
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
            params: Vec::new(),
        }
    }

    /// Create a `GET` request
    #[must_use]
    pub fn get(route: impl Into<String>) -> Self {
        Self::new(Method::GET, route)
    }

    /// Create a `POST` request
    #[must_use]
    pub fn post(route: impl Into<String>) -> Self {
        Self::new(Method::POST, route)
    }

    /// Create a `PUT` request
    #[must_use]
    pub fn put(route: impl Into<String>) -> Self {
        Self::new(Method::PUT, route)
    }

    /// Create a `PATCH` request
    #[must_use]
    pub fn patch(route: impl Into<String>) -> Self {
        Self::new(Method::PATCH, route)
    }

    /// Create a `DELETE` request
    #[must_use]
    pub fn delete(route: impl Into<String>) -> Self {
        Self::new(Method::DELETE, route)
    }

    /// Set a JSON body
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = RequestBody::Json(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    /// Set an already encoded multipart body. `content_type` has to carry
    /// the boundary used in `bytes`.
    #[must_use]
    pub fn multipart(mut self, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Multipart {
            content_type: content_type.into(),
            bytes: bytes.into(),
        };
        self
    }

    /// Append a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Set a header for this request only
    ///
    /// # Errors
    ///
    /// Returns an error if the name or the value is not a valid header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_json_body_is_encoded_once() {
        let request = Request::patch("/channels/381870553235193857")
            .json(&json!({"name": "general"}))
            .unwrap();

        assert_eq!(request.method, Method::PATCH);
        assert_eq!(
            request.body,
            RequestBody::Json(Bytes::from_static(br#"{"name":"general"}"#))
        );
        assert_eq!(request.clone(), request);
    }

    #[test]
    fn test_multipart_body() {
        let request = Request::post("/channels/381870553235193857/messages")
            .multipart("multipart/form-data; boundary=xyz", &b"--xyz--"[..]);

        assert_eq!(
            request.body,
            RequestBody::Multipart {
                content_type: "multipart/form-data; boundary=xyz".to_string(),
                bytes: Bytes::from_static(b"--xyz--"),
            }
        );
    }

    #[test]
    fn test_query_and_headers() {
        let request = Request::get("/guilds/197038439483310086/members")
            .query("limit", 1000)
            .query("after", "0")
            .header("X-Audit-Log-Reason", "cleanup")
            .unwrap();

        assert_eq!(
            request.params,
            vec![
                ("limit".to_string(), "1000".to_string()),
                ("after".to_string(), "0".to_string())
            ]
        );
        assert_eq!(request.headers.get("x-audit-log-reason").unwrap(), "cleanup");
    }

    #[test]
    fn test_invalid_header() {
        assert!(Request::get("/").header("bad header", "value").is_err());
        assert!(Request::get("/").header("x-ok", "bad\nvalue").is_err());
    }
}
