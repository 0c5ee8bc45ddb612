use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SOCKET_URL: &str = "wss://my.webhookrelay.com/v1/socket";
pub const DEFAULT_API_URL: &str = "https://my.webhookrelay.com";
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3_000);
pub const DEFAULT_MISSING_PING_THRESHOLD: Duration = Duration::from_millis(90_000);

/// What to do when the relay rejects our credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnauthorizedPolicy {
    /// Log, forward the status to the handler and keep the connection
    #[default]
    Forward,
    /// Forward the status, then close and stop reconnecting
    Stop,
}

impl FromStr for UnauthorizedPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "stop" => Ok(Self::Stop),
            other => Err(anyhow!("unknown unauthorized policy '{}', expected 'forward' or 'stop'", other)),
        }
    }
}

/// Settings for one relay client instance
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub key: String,
    pub secret: String,
    pub buckets: Vec<String>,
    pub socket_url: String,
    pub api_url: String,
    pub reconnect_interval: Duration,
    pub missing_ping_threshold: Duration,
    pub unauthorized_policy: UnauthorizedPolicy,
}

impl ClientConfig {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            buckets: Vec::new(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            missing_ping_threshold: DEFAULT_MISSING_PING_THRESHOLD,
            unauthorized_policy: UnauthorizedPolicy::default(),
        }
    }

    pub fn with_buckets<I, S>(mut self, buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.buckets = buckets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = url.into();
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_missing_ping_threshold(mut self, threshold: Duration) -> Self {
        self.missing_ping_threshold = threshold;
        self
    }

    pub fn with_unauthorized_policy(mut self, policy: UnauthorizedPolicy) -> Self {
        self.unauthorized_policy = policy;
        self
    }
}

/// Canned response the listener sends back for every webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoResponse {
    pub status: u16,
    pub body: String,
}

/// Listener configuration, read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub relay_key: String,
    pub relay_secret: String,
    pub buckets: Vec<String>,
    pub socket_url: String,
    pub api_url: String,
    pub reconnect_interval_ms: u64,
    pub missing_ping_threshold_ms: u64,
    pub unauthorized_policy: UnauthorizedPolicy,
    pub auto_response: Option<AutoResponse>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay_key = lookup("RELAY_KEY")
            .filter(|v| !v.is_empty())
            .context("RELAY_KEY must be set")?;

        let relay_secret = lookup("RELAY_SECRET")
            .filter(|v| !v.is_empty())
            .context("RELAY_SECRET must be set")?;

        let buckets: Vec<String> = lookup("RELAY_BUCKETS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let socket_url = lookup("RELAY_SOCKET_URL").unwrap_or_else(|| DEFAULT_SOCKET_URL.to_string());
        let api_url = lookup("RELAY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let reconnect_interval_ms = lookup("RELAY_RECONNECT_INTERVAL_MS")
            .unwrap_or_else(|| DEFAULT_RECONNECT_INTERVAL.as_millis().to_string())
            .parse()
            .context("RELAY_RECONNECT_INTERVAL_MS must be a valid number")?;

        let missing_ping_threshold_ms = lookup("RELAY_MISSING_PING_THRESHOLD_MS")
            .unwrap_or_else(|| DEFAULT_MISSING_PING_THRESHOLD.as_millis().to_string())
            .parse()
            .context("RELAY_MISSING_PING_THRESHOLD_MS must be a valid number")?;

        let unauthorized_policy = match lookup("RELAY_UNAUTHORIZED_POLICY") {
            Some(v) => v.parse().context("RELAY_UNAUTHORIZED_POLICY is invalid")?,
            None => UnauthorizedPolicy::default(),
        };

        let auto_response = match lookup("RELAY_AUTO_RESPONSE_STATUS") {
            Some(status) => Some(AutoResponse {
                status: status
                    .parse()
                    .context("RELAY_AUTO_RESPONSE_STATUS must be a valid HTTP status code")?,
                body: lookup("RELAY_AUTO_RESPONSE_BODY").unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Config {
            relay_key,
            relay_secret,
            buckets,
            socket_url,
            api_url,
            reconnect_interval_ms,
            missing_ping_threshold_ms,
            unauthorized_policy,
            auto_response,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.relay_key, &self.relay_secret)
            .with_buckets(self.buckets.iter().cloned())
            .with_socket_url(&self.socket_url)
            .with_api_url(&self.api_url)
            .with_reconnect_interval(Duration::from_millis(self.reconnect_interval_ms))
            .with_missing_ping_threshold(Duration::from_millis(self.missing_ping_threshold_ms))
            .with_unauthorized_policy(self.unauthorized_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_lookup(lookup_from(&[("RELAY_KEY", "k"), ("RELAY_SECRET", "s")])).unwrap();
        assert!(config.buckets.is_empty());
        assert_eq!(config.socket_url, DEFAULT_SOCKET_URL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.reconnect_interval_ms, 3_000);
        assert_eq!(config.missing_ping_threshold_ms, 90_000);
        assert_eq!(config.unauthorized_policy, UnauthorizedPolicy::Forward);
        assert_eq!(config.auto_response, None);
    }

    #[test]
    fn requires_credentials() {
        assert!(Config::from_lookup(lookup_from(&[("RELAY_KEY", "k")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("RELAY_KEY", ""), ("RELAY_SECRET", "s")])).is_err());
    }

    #[test]
    fn parses_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("RELAY_KEY", "k"),
            ("RELAY_SECRET", "s"),
            ("RELAY_BUCKETS", "AlgoRythm, other,,"),
            ("RELAY_RECONNECT_INTERVAL_MS", "500"),
            ("RELAY_MISSING_PING_THRESHOLD_MS", "1000"),
            ("RELAY_UNAUTHORIZED_POLICY", "Stop"),
            ("RELAY_AUTO_RESPONSE_STATUS", "201"),
            ("RELAY_AUTO_RESPONSE_BODY", "banana"),
        ]))
        .unwrap();

        assert_eq!(config.buckets, vec!["AlgoRythm".to_string(), "other".to_string()]);
        assert_eq!(config.unauthorized_policy, UnauthorizedPolicy::Stop);
        assert_eq!(config.auto_response, Some(AutoResponse { status: 201, body: "banana".into() }));

        let client = config.client_config();
        assert_eq!(client.reconnect_interval, Duration::from_millis(500));
        assert_eq!(client.missing_ping_threshold, Duration::from_secs(1));
        assert_eq!(client.buckets, config.buckets);
    }

    #[test]
    fn rejects_bad_numbers() {
        let result = Config::from_lookup(lookup_from(&[
            ("RELAY_KEY", "k"),
            ("RELAY_SECRET", "s"),
            ("RELAY_RECONNECT_INTERVAL_MS", "soon"),
        ]));
        assert!(result.is_err());

        let result = Config::from_lookup(lookup_from(&[
            ("RELAY_KEY", "k"),
            ("RELAY_SECRET", "s"),
            ("RELAY_UNAUTHORIZED_POLICY", "panic"),
        ]));
        assert!(result.is_err());
    }
}
