//! The shared connection every request is sent over.
//!
//! A [`Connection`] wraps a `reqwest::Client` whose pool keeps the
//! established connection to the API alive. The [`ConnectionManager`] hands
//! out the current connection and swaps in a fresh one on demand. Requests
//! that already hold the old handle finish on it; it is closed once the
//! last of them lets go.
use http::{HeaderMap, HeaderValue, header};
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

use crate::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT, ErrorKind, ReconnectPolicy, Result,
};

/// Probe interval for idle TCP connections
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);
/// Ping interval for idle HTTP/2 connections
const HTTP2_KEEPALIVE: Duration = Duration::from_secs(30);

/// Everything needed to open a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// API root, probed when a connection is opened
    pub base_url: Url,
    /// Headers sent with every request, including the credential
    pub headers: HeaderMap,
    /// Timeout of a whole request/response exchange
    pub timeout: Duration,
    /// Timeout for opening a connection
    pub connect_timeout: Duration,
    /// Retry behaviour when opening a connection fails
    pub reconnect: ReconnectPolicy,
}

impl ConnectionSettings {
    /// Settings with default timeouts and reconnect policy.
    ///
    /// A token without `Bot ` or `Bearer ` prefix is taken as a bot token.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL, the token is empty
    /// or a header value cannot be encoded.
    pub fn new(base_url: &str, token: &SecretString, user_agent: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| ErrorKind::InvalidUrl(base_url.to_string(), e))?;

        let token = token.expose_secret().trim();
        if token.is_empty() {
            return Err(ErrorKind::MissingToken);
        }
        let credential = if token.starts_with("Bot ") || token.starts_with("Bearer ") {
            token.to_string()
        } else {
            format!("Bot {token}")
        };
        let mut authorization = HeaderValue::from_str(&credential)?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, authorization);
        headers.insert(header::USER_AGENT, HeaderValue::from_str(user_agent)?);

        Ok(Self {
            base_url,
            headers,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        })
    }

    fn build(&self, id: u64) -> Result<Connection> {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(self.headers.clone())
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(TCP_KEEPALIVE)
            .pool_idle_timeout(None)
            .http2_keep_alive_interval(HTTP2_KEEPALIVE)
            .http2_keep_alive_while_idle(true)
            .build()
            .map_err(ErrorKind::BuildClient)?;

        Ok(Connection { id, client })
    }

    /// Open a connection and make sure the API is reachable through it.
    /// Any HTTP response to the probe counts, the status does not matter.
    async fn open_once(&self, id: u64) -> Result<Connection> {
        let connection = self.build(id)?;
        connection
            .client
            .head(self.base_url.clone())
            .send()
            .await
            .map_err(ErrorKind::from_transport)?;
        log::debug!("Opened connection {id} to {}", self.base_url);
        Ok(connection)
    }

    /// Open a live connection, retrying with backoff as the reconnect
    /// policy allows.
    async fn open(&self, id: u64) -> Result<Connection> {
        let mut attempts = 0;
        loop {
            match self.open_once(id).await {
                Ok(connection) => return Ok(connection),
                // A client which cannot be built now will not build later either
                Err(e @ ErrorKind::BuildClient(_)) => return Err(e),
                Err(e) => {
                    attempts += 1;
                    if !self.reconnect.allows_retry(attempts) {
                        log::error!(
                            "Giving up connecting to {} after {attempts} attempts",
                            self.base_url
                        );
                        return Err(e);
                    }
                    let backoff = self.reconnect.backoff(attempts);
                    log::warn!(
                        "Connecting to {} failed ({e}), retrying in {}ms",
                        self.base_url,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// A handle to one connection to the API.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    client: reqwest::Client,
}

impl Connection {
    /// Identifier of this connection, unique per [`ConnectionManager`]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The client to send requests with
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Owns the shared connection and replaces it when asked to.
#[derive(Debug)]
pub struct ConnectionManager {
    settings: ConnectionSettings,
    current: RwLock<Arc<Connection>>,
    /// Serializes refreshes
    refreshing: Arc<Mutex<()>>,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl ConnectionManager {
    /// Open the first connection.
    ///
    /// # Errors
    ///
    /// Fails if no live connection could be opened within the limits of the
    /// reconnect policy.
    pub async fn connect(settings: ConnectionSettings) -> Result<Arc<Self>> {
        let first = settings.open(1).await?;
        log::info!("Connected to {}", settings.base_url);

        Ok(Arc::new(Self {
            settings,
            current: RwLock::new(Arc::new(first)),
            refreshing: Arc::new(Mutex::new(())),
            next_id: AtomicU64::new(2),
            generation: AtomicU64::new(1),
        }))
    }

    /// The settings connections are opened with
    #[must_use]
    pub const fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// The connection new requests should use
    #[must_use]
    pub fn current(&self) -> Arc<Connection> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// How many connections have been installed as the shared one so far
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Open a new connection, check that it is live and install it as the
    /// shared one. The previous connection is closed as soon as the requests
    /// still using it are done.
    ///
    /// # Errors
    ///
    /// Fails if no live connection could be opened within the limits of the
    /// reconnect policy. The current connection stays in place in that case.
    pub async fn refresh(&self) -> Result<Arc<Connection>> {
        let _guard = self.refreshing.lock().await;
        self.replace().await
    }

    /// Ask for a refresh in the background. Does nothing while another
    /// refresh is running, so a burst of failures leads to a single new
    /// connection.
    pub fn request_refresh(self: &Arc<Self>) {
        let Ok(guard) = Arc::clone(&self.refreshing).try_lock_owned() else {
            log::debug!("Connection refresh already in progress");
            return;
        };

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.replace().await {
                log::warn!("Background connection refresh failed: {e}");
            }
            drop(guard);
        });
    }

    /// A standalone connection that is not shared and not probed, for a
    /// single replay after the shared connection failed.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn open_temporary(&self) -> Result<Connection> {
        self.settings.build(self.allocate_id())
    }

    /// Caller must hold `refreshing`
    async fn replace(&self) -> Result<Arc<Connection>> {
        let fresh = Arc::new(self.settings.open(self.allocate_id()).await?);

        let old = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, Arc::clone(&fresh))
        };
        self.generation.fetch_add(1, Ordering::AcqRel);

        log::info!("Replaced connection {} with {}", old.id, fresh.id);
        drop(old);
        Ok(fresh)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str) -> ConnectionSettings {
        ConnectionSettings::new(base_url, &SecretString::from("abc".to_string()), "sluice-tests").unwrap()
    }

    #[test]
    fn test_bot_prefix_is_added() {
        let settings = settings("http://localhost");
        let authorization = settings.headers.get(header::AUTHORIZATION).unwrap();
        assert_eq!(authorization, "Bot abc");
        assert!(authorization.is_sensitive());
        assert_eq!(settings.headers.get(header::USER_AGENT).unwrap(), "sluice-tests");
    }

    #[test]
    fn test_explicit_prefix_is_kept() {
        let settings = ConnectionSettings::new(
            "http://localhost",
            &SecretString::from("Bearer xyz".to_string()),
            "sluice-tests",
        )
        .unwrap();
        assert_eq!(settings.headers.get(header::AUTHORIZATION).unwrap(), "Bearer xyz");
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(
            ConnectionSettings::new("http://localhost", &SecretString::from(" ".to_string()), "ua"),
            Err(ErrorKind::MissingToken)
        ));
        assert!(matches!(
            ConnectionSettings::new("not a url", &SecretString::from("abc".to_string()), "ua"),
            Err(ErrorKind::InvalidUrl(_, _))
        ));
    }

    #[tokio::test]
    async fn test_connect_probes_the_api() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/"))
            .and(wiremock::matchers::header("authorization", "Bot abc"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let manager = ConnectionManager::connect(settings(&server.uri())).await.unwrap();
        assert_eq!(manager.current().id(), 1);
        assert_eq!(manager.generation(), 1);
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_handle_usable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let manager = ConnectionManager::connect(settings(&server.uri())).await.unwrap();
        let old = manager.current();

        let fresh = manager.refresh().await.unwrap();
        assert_ne!(old.id(), fresh.id());
        assert_eq!(manager.current().id(), fresh.id());
        assert_eq!(manager.generation(), 2);

        // An in-flight holder of the old handle can still finish its work
        let response = old
            .client()
            .get(format!("{}/ping", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_requests_coalesce() {
        let server = MockServer::start().await;
        let manager = ConnectionManager::connect(settings(&server.uri())).await.unwrap();

        manager.request_refresh();
        manager.request_refresh();
        manager.request_refresh();

        // Wait for the background refresh, then nothing else may follow
        let _guard = manager.refreshing.lock().await;
        assert_eq!(manager.generation(), 2);
    }

    #[tokio::test]
    async fn test_bounded_reconnect_gives_up() {
        // Nothing listens on port 9 of the loopback interface
        let mut settings = settings("http://127.0.0.1:9");
        settings.reconnect = ReconnectPolicy {
            max_attempts: Some(2),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
        };

        let start = Instant::now();
        let result = ConnectionManager::connect(settings).await;
        assert!(matches!(result, Err(ErrorKind::ConnectionDown(_))));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_temporary_connection_is_not_installed() {
        let server = MockServer::start().await;
        let manager = ConnectionManager::connect(settings(&server.uri())).await.unwrap();

        let temporary = manager.open_temporary().unwrap();
        assert_ne!(temporary.id(), manager.current().id());
        assert_eq!(manager.generation(), 1);
    }
}
