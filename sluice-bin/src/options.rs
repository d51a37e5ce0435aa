use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use http::{HeaderName, HeaderValue, Method};
use secrecy::SecretString;
use sluice_lib::{Config, Request};

use crate::verbosity::Verbosity;

/// Configuration file loaded from the working directory when `--config` is
/// not given
pub(crate) const SLUICE_CONFIG_FILE: &str = "sluice.toml";

/// Parse a `Name: value` header argument.
///
/// Only the first colon separates name and value. The error never repeats
/// the argument, which may carry credentials.
fn parse_header(header: &str) -> Result<(String, String), String> {
    let Some((name, value)) = header.split_once(':') else {
        return Err("Invalid header format, expected `Header-Name: value`".to_string());
    };

    let name =
        HeaderName::from_str(name.trim()).map_err(|e| format!("Invalid header name: {e}"))?;
    let value = value.trim();
    HeaderValue::from_str(value)
        .map_err(|e| format!("Invalid value for header `{name}`: {e}"))?;
    Ok((name.to_string(), value.to_string()))
}

/// Parse a query parameter in the format `key=value`
fn parse_query_pair(pair: &str) -> Result<(String, String), String> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid query parameter `{pair}`, expected `key=value`")),
    }
}

fn parse_method(method: &str) -> Result<Method, String> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("Invalid HTTP method `{method}`"))
}

/// Send a single rate-limit aware request to the API and print the reply
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct SluiceOptions {
    /// HTTP method, e.g. `GET` or `POST`
    #[arg(value_parser = parse_method)]
    pub(crate) method: Method,

    /// Route below the API root, e.g. `/channels/381870553235193857/messages`
    pub(crate) route: String,

    /// Configuration file to use
    #[arg(short, long = "config", value_name = "CONFIG_FILE")]
    pub(crate) config_file: Option<PathBuf>,

    /// API token. Sent as a bot token unless it starts with `Bot ` or `Bearer `
    #[arg(long, env = "SLUICE_TOKEN", hide_env_values = true)]
    pub(crate) token: Option<SecretString>,

    /// API root every route is appended to
    #[arg(long)]
    pub(crate) base_url: Option<String>,

    /// User agent sent with the request
    #[arg(long)]
    pub(crate) user_agent: Option<String>,

    /// Timeout of the whole request/response exchange, e.g. `10s`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) timeout: Option<Duration>,

    /// JSON body of the request
    #[arg(long, value_name = "JSON")]
    pub(crate) json: Option<String>,

    /// Query parameter, can be given multiple times
    #[arg(long, action = clap::ArgAction::Append, value_parser = parse_query_pair, value_name = "KEY=VALUE")]
    pub(crate) query: Vec<(String, String)>,

    /// Header for this request, can be given multiple times
    #[arg(
        short = 'H',
        long,
        action = clap::ArgAction::Append,
        value_parser = parse_header,
        value_name = "HEADER:VALUE"
    )]
    pub(crate) header: Vec<(String, String)>,

    #[command(flatten)]
    pub(crate) verbose: Verbosity,
}

impl SluiceOptions {
    /// The configuration to run with.
    ///
    /// Command-line arguments (and `SLUICE_TOKEN`) take precedence over the
    /// configuration file, which takes precedence over the defaults.
    pub(crate) fn config(&self) -> Result<Config> {
        let mut config = match &self.config_file {
            Some(path) => load(path)?,
            None => {
                let default_config = Path::new(SLUICE_CONFIG_FILE);
                if default_config.is_file() {
                    load(default_config)?
                } else {
                    Config::default()
                }
            }
        };

        self.merge_into(&mut config);
        Ok(config)
    }

    fn merge_into(&self, config: &mut Config) {
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(base_url) = &self.base_url {
            config.base_url.clone_from(base_url);
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent.clone_from(user_agent);
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
    }

    /// The request described by the arguments
    pub(crate) fn request(&self) -> Result<Request> {
        let mut request = Request::new(self.method.clone(), self.route.clone());

        if let Some(json) = &self.json {
            let body: serde_json::Value =
                serde_json::from_str(json).context("`--json` is not valid JSON")?;
            request = request.json(&body)?;
        }
        for (key, value) in &self.query {
            request = request.query(key.clone(), value);
        }
        for (name, value) in &self.header {
            request = request.header(name, value)?;
        }
        Ok(request)
    }
}

fn load(path: &Path) -> Result<Config> {
    Config::load_from_file(path)
        .with_context(|| format!("Cannot load configuration file `{}`", path.display()))
}
