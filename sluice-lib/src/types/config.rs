use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

use crate::dispatcher::DEFAULT_SWEEP_INTERVAL;
use crate::{ErrorKind, Result};

/// Default API root, every route is appended to it.
pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
/// Default user agent, `sluice/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("sluice/", env!("CARGO_PKG_VERSION"));
/// Default timeout of a whole request/response exchange, 30 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for opening a connection, 10 seconds.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How often opening a connection is retried before giving up.
///
/// The default never gives up, so the shared connection is always
/// re-established instead of being abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectPolicy {
    /// Maximum number of attempts, `None` for unbounded
    pub max_attempts: Option<u32>,
    /// Wait after the first failed attempt; doubled after every further failure
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for the wait between two attempts
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another attempt may follow `attempts` failed ones
    #[must_use]
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Wait before the next attempt, after `attempts` failed ones
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Configuration of a [`Dispatcher`](crate::Dispatcher), usually loaded from
/// a TOML file.
///
/// ```toml
/// token = "Bot abc.def.ghi"
/// timeout = "20s"
/// sweep_interval = "10m"
///
/// [reconnect]
/// max_attempts = 10
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Credential sent in the `Authorization` header
    #[serde(deserialize_with = "deserialize_token")]
    pub token: Option<SecretString>,
    /// API root every route is appended to
    pub base_url: String,
    /// User agent sent with every request
    pub user_agent: String,
    /// Timeout of a whole request/response exchange
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Timeout for opening a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// How often expired buckets are evicted and the connection is renewed
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Retry behaviour when opening a connection fails
    pub reconnect: ReconnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Load a configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// configuration.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ErrorKind::ReadConfig(path.to_path_buf(), e))?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Tokens are read as plain strings and wrapped right away.
fn deserialize_token<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.token.is_none());
        assert_eq!(config.base_url, "https://discord.com/api/v10");
        assert!(config.user_agent.starts_with("sluice/"));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(15 * 60));
        assert_eq!(config.reconnect.max_attempts, None);
    }

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(
            r#"
            token = "Bot abc"
            base_url = "http://localhost:8080/api"
            timeout = "5s"
            sweep_interval = "1m"

            [reconnect]
            max_attempts = 3
            initial_backoff = "100ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.token.unwrap().expose_secret(), "Bot abc");
        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(
            config.reconnect,
            ReconnectPolicy {
                max_attempts: Some(3),
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("tokn = \"typo\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user_agent = \"tests/1.0\"").unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.user_agent, "tests/1.0");

        let missing = Config::load_from_file(Path::new("/does/not/exist.toml"));
        assert!(matches!(missing, Err(ErrorKind::ReadConfig(_, _))));
    }

    #[test]
    fn test_reconnect_backoff() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(4), Duration::from_secs(4));
        assert_eq!(policy.backoff(100), Duration::from_secs(30));
        assert!(policy.allows_retry(u32::MAX - 1));

        let bounded = ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        assert!(bounded.allows_retry(1));
        assert!(!bounded.allows_retry(2));
    }
}
