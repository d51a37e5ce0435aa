use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use std::sync::Arc;
use url::Url;

use crate::retry::StreamClosedExt;
use crate::{Connection, ConnectionManager, ErrorKind, Request, RequestBody, Result};

/// A response as it came off the wire, before it is classified.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Status code
    pub status: StatusCode,
    /// All response headers
    pub headers: HeaderMap,
    /// The full body; empty for `204 No Content`
    pub body: Bytes,
}

/// Performs single HTTP exchanges.
///
/// When the peer closes the stream while a request is in flight, the request
/// is replayed once on a temporary connection and a refresh of the shared
/// connection is requested. Whatever the replay yields is final.
#[derive(Debug, Clone)]
pub struct Executor {
    connections: Arc<ConnectionManager>,
    base_url: String,
}

impl Executor {
    /// Create an executor that sends requests below the manager's base URL
    #[must_use]
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        let base_url = connections
            .settings()
            .base_url
            .as_str()
            .trim_end_matches('/')
            .to_string();
        Self {
            connections,
            base_url,
        }
    }

    /// Send `request` over `connection` and read the whole response.
    ///
    /// # Errors
    ///
    /// Returns a transport error if no response could be obtained, even
    /// after the replay. Responses with any status code are `Ok`.
    pub async fn execute(&self, connection: &Connection, request: &Request) -> Result<RawResponse> {
        let url = self.url_for(request)?;

        match send(connection, request, url.clone()).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_stream_closed() => {
                log::warn!(
                    "Connection {} closed during {} {}: {e}; replaying once",
                    connection.id(),
                    request.method,
                    request.route
                );
                self.replay(request, url).await
            }
            Err(e) => Err(ErrorKind::from_transport(e)),
        }
    }

    async fn replay(&self, request: &Request, url: Url) -> Result<RawResponse> {
        let temporary = self.connections.open_temporary()?;
        let result = send(&temporary, request, url)
            .await
            .map_err(ErrorKind::from_transport);

        self.connections.request_refresh();
        drop(temporary);

        if let Err(e) = &result {
            log::warn!("Replay of {} {} failed: {e}", request.method, request.route);
        }
        result
    }

    fn url_for(&self, request: &Request) -> Result<Url> {
        let separator = if request.route.starts_with('/') { "" } else { "/" };
        let raw = format!("{}{separator}{}", self.base_url, request.route);
        let mut url = Url::parse(&raw).map_err(|e| ErrorKind::InvalidUrl(raw.clone(), e))?;
        if !request.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.params);
        }
        Ok(url)
    }
}

async fn send(
    connection: &Connection,
    request: &Request,
    url: Url,
) -> std::result::Result<RawResponse, reqwest::Error> {
    let mut builder = connection
        .client()
        .request(request.method.clone(), url)
        .headers(request.headers.clone());

    builder = match &request.body {
        RequestBody::Empty => builder,
        RequestBody::Json(bytes) => builder
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(bytes.clone()),
        RequestBody::Multipart {
            content_type,
            bytes,
        } => builder
            .header(header::CONTENT_TYPE, content_type.as_str())
            .body(bytes.clone()),
    };

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
        Bytes::new()
    } else {
        response.bytes().await?
    };

    log::debug!("{} {} -> {status}", request.method, request.route);
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}
