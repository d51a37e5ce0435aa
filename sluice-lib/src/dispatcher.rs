//! Entry point for callers.
//!
//! Every submitted request travels through a channel to the dispatch loop,
//! which spawns one task per request. That task either sends the request
//! right away or, if its bucket is exhausted, sleeps and feeds the request
//! back into the channel, where it is evaluated from scratch.
use http::StatusCode;
use secrecy::SecretString;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use typed_builder::TypedBuilder;

use crate::ratelimit::{FALLBACK_RETRY_AFTER, classify, normalize, retry_after};
use crate::{
    BucketKey, BucketStore, Config, ConnectionManager, ConnectionSettings, ErrorKind, Executor,
    Readiness, ReconnectPolicy, Request, Response, Result,
};

/// Default interval of the background sweep, 15 minutes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Builder for [`Dispatcher`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `DispatcherBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `DispatcherBuilder`.
"))]
pub struct DispatcherBuilder {
    /// Credential sent in the `Authorization` header of every request.
    ///
    /// A token without `Bot ` or `Bearer ` prefix is sent as a bot token.
    token: Option<SecretString>,
    /// API root every route is appended to.
    #[builder(default_code = "String::from(crate::DEFAULT_BASE_URL)")]
    base_url: String,
    /// User agent sent with every request.
    #[builder(default_code = "String::from(crate::DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Timeout of a whole request/response exchange.
    #[builder(default = crate::DEFAULT_TIMEOUT)]
    timeout: Duration,
    /// Timeout for opening a connection.
    #[builder(default = crate::DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    /// How often expired buckets are evicted and the shared connection is
    /// replaced. Zero disables the sweep.
    #[builder(default = DEFAULT_SWEEP_INTERVAL)]
    sweep_interval: Duration,
    /// Retry behaviour when opening a connection fails.
    reconnect: ReconnectPolicy,
}

impl Default for DispatcherBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DispatcherBuilder {
    /// Take all settings from `config`.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let Config {
            token,
            base_url,
            user_agent,
            timeout,
            connect_timeout,
            sweep_interval,
            reconnect,
        } = config;

        Self::builder()
            .token(token)
            .base_url(base_url)
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .sweep_interval(sweep_interval)
            .reconnect(reconnect)
            .build()
    }

    /// Open the shared connection and start the background tasks on the
    /// current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is set, a setting is invalid, or no
    /// live connection could be opened within the limits of the reconnect
    /// policy.
    pub async fn dispatcher(self) -> Result<Dispatcher> {
        let token = self.token.ok_or(ErrorKind::MissingToken)?;

        let mut settings = ConnectionSettings::new(&self.base_url, &token, &self.user_agent)?;
        settings.timeout = self.timeout;
        settings.connect_timeout = self.connect_timeout;
        settings.reconnect = self.reconnect;

        let connections = ConnectionManager::connect(settings).await?;
        let shared = Arc::new(Shared {
            buckets: Arc::new(BucketStore::new()),
            executor: Executor::new(Arc::clone(&connections)),
            connections,
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(receiver, sender.downgrade(), Arc::clone(&shared)));

        if self.sweep_interval.is_zero() {
            log::debug!("Background sweep disabled");
        } else {
            tokio::spawn(sweep_loop(
                self.sweep_interval,
                Arc::downgrade(&shared.buckets),
                Arc::downgrade(&shared.connections),
            ));
        }

        Ok(Dispatcher { sender, shared })
    }
}

#[derive(Debug)]
struct Shared {
    buckets: Arc<BucketStore>,
    connections: Arc<ConnectionManager>,
    executor: Executor,
}

/// A submitted request together with the way back to its caller.
#[derive(Debug)]
struct Envelope {
    request: Request,
    key: BucketKey,
    reply: oneshot::Sender<Result<Response>>,
}

impl Envelope {
    fn reply(self, result: Result<Response>) {
        // The caller may have stopped waiting
        if self.reply.send(result).is_err() {
            log::debug!("Dropping reply to {}, caller is gone", self.key);
        }
    }
}

/// Sends requests to the remote API without running into its rate limits.
///
/// Cloning is cheap; all clones share the same buckets and connection.
/// The background tasks stop once the last clone is dropped and no request
/// is pending.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<Envelope>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Send `request` and wait for its reply.
    ///
    /// If the bucket of the request is exhausted, the request waits until it
    /// resets and is then evaluated again. Requests of unrelated buckets are
    /// never held up by it. Within one bucket there is no ordering: a waiting
    /// request may be overtaken by one submitted later.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Api`] if the API answered with a non-successful
    /// status, a transport error if no response was obtained, and
    /// [`ErrorKind::DispatcherClosed`] if the background tasks are gone.
    pub async fn submit(&self, request: Request) -> Result<Response> {
        let key = normalize(&request.route, &request.method);
        let (reply, response) = oneshot::channel();

        self.sender
            .send(Envelope {
                request,
                key,
                reply,
            })
            .map_err(|_| ErrorKind::DispatcherClosed)?;

        response.await.map_err(|_| ErrorKind::DispatcherClosed)?
    }

    /// Forget everything known about every bucket.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn clear_all_buckets(&self) -> Result<()> {
        self.shared.buckets.clear();
        log::info!("Cleared all rate-limit buckets");
        Ok(())
    }

    /// The rate-limit state shared by all requests
    #[must_use]
    pub fn buckets(&self) -> &BucketStore {
        &self.shared.buckets
    }

    /// The manager of the shared connection
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.shared.connections
    }
}

async fn dispatch_loop(
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
    sender: mpsc::WeakUnboundedSender<Envelope>,
    shared: Arc<Shared>,
) {
    while let Some(envelope) = receiver.recv().await {
        // Pending deferrals keep the channel open
        let resubmit = sender.upgrade();
        tokio::spawn(dispatch(Arc::clone(&shared), envelope, resubmit));
    }
    log::debug!("Dispatch loop stopped");
}

async fn dispatch(
    shared: Arc<Shared>,
    envelope: Envelope,
    resubmit: Option<mpsc::UnboundedSender<Envelope>>,
) {
    if let Readiness::Wait(wait) = shared.buckets.time_until_ready(&envelope.key) {
        defer(envelope, wait, resubmit);
        return;
    }

    let connection = shared.connections.current();
    let response = shared
        .executor
        .execute(&connection, &envelope.request)
        .await;
    drop(connection);

    match classify(response, &envelope.key, &shared.buckets) {
        // The headers of the 429 have already been recorded, so the bucket
        // check covers route and global limits
        Err(ErrorKind::Api { status, payload }) if status == StatusCode::TOO_MANY_REQUESTS => {
            let bucket_wait = match shared.buckets.peek(&envelope.key) {
                Readiness::Now => Duration::ZERO,
                Readiness::Wait(wait) => wait,
            };
            let wait = bucket_wait.max(retry_after(&payload).unwrap_or(FALLBACK_RETRY_AFTER));
            log::warn!(
                "Rate limited on {} despite local bookkeeping, retrying in {}ms",
                envelope.key,
                wait.as_millis()
            );
            defer(envelope, wait, resubmit);
        }
        result => envelope.reply(result),
    }
}

/// Put `envelope` back into the dispatch channel once `wait` has passed.
/// Nothing is held while sleeping besides the request itself.
fn defer(envelope: Envelope, wait: Duration, resubmit: Option<mpsc::UnboundedSender<Envelope>>) {
    let Some(resubmit) = resubmit else {
        envelope.reply(Err(ErrorKind::DispatcherClosed));
        return;
    };

    log::debug!("Deferring {} for {}ms", envelope.key, wait.as_millis());
    tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        if let Err(mpsc::error::SendError(envelope)) = resubmit.send(envelope) {
            envelope.reply(Err(ErrorKind::DispatcherClosed));
        }
    });
}

async fn sweep_loop(
    period: Duration,
    buckets: Weak<BucketStore>,
    connections: Weak<ConnectionManager>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let (Some(buckets), Some(connections)) = (buckets.upgrade(), connections.upgrade()) else {
            break;
        };

        let evicted = buckets.sweep();
        log::info!("Sweep evicted {evicted} expired buckets");
        drop(buckets);

        if let Err(e) = connections.refresh().await {
            log::warn!("Periodic connection refresh failed: {e}");
        }
    }
    log::debug!("Sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};

    #[test]
    fn test_builder_defaults() {
        let builder = DispatcherBuilder::default();
        assert!(builder.token.is_none());
        assert_eq!(builder.base_url, DEFAULT_BASE_URL);
        assert_eq!(builder.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert_eq!(builder.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn test_builder_from_config() {
        let config: Config = toml::from_str(
            r#"
            token = "abc"
            base_url = "http://localhost:1234"
            sweep_interval = "0s"
            "#,
        )
        .unwrap();

        let builder = DispatcherBuilder::from_config(config);
        assert!(builder.token.is_some());
        assert_eq!(builder.base_url, "http://localhost:1234");
        assert_eq!(builder.sweep_interval, Duration::ZERO);
        assert_eq!(builder.timeout, DEFAULT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_missing_token() {
        let result = DispatcherBuilder::default().dispatcher().await;
        assert!(matches!(result, Err(ErrorKind::MissingToken)));
    }
}
