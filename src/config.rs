//! Runtime configuration.
//!
//! Layering, lowest to highest precedence:
//! - `Config::default()`
//! - TOML file (`relay.toml`, or the path in `RELAY_CONFIG`)
//! - `RELAY_*` environment variables, `__` separating nested keys
//!   (e.g. `RELAY_PROVIDERS__GOOGLE__CLIENT_ID`)
//!
//! The loaded value is immutable and handed to constructors explicitly.

use crate::error::RelayError;
use crate::types::Provider;
use backon::ExponentialBuilder;
use chrono::TimeDelta;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use oauth2::ClientSecret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub refresh: RefreshConfig,
    pub providers: HashMap<Provider, ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    /// Shared secret for the internal routes; empty disables them.
    pub relay_key: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_url: "sqlite://relay.db".to_string(),
            loglevel: "info".to_string(),
            relay_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub proxy: Option<Url>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            user_agent: concat!("credential-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
        }
    }
}

/// Backoff for outbound provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub call_timeout_secs: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            max_retries: 3,
            call_timeout_secs: 15,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Exponential schedule: base, 2*base, 4*base, ... capped at `max_delay_ms`.
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(2.0)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Tokens expiring within this many seconds are refreshed ahead of use.
    /// Zero refreshes only once the expiry is at or before now.
    pub skew_secs: i64,
    /// Retries for transient refresh failures (429, 5xx, network).
    pub max_retries: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            skew_secs: 0,
            max_retries: 2,
        }
    }
}

impl RefreshConfig {
    pub fn skew(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.skew_secs.max(0)).unwrap_or(TimeDelta::zero())
    }
}

/// OAuth application registered with one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: ClientSecret,
    pub redirect_uri: Url,
    /// Overrides the provider's default scopes.
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub auth_url: Option<Url>,
    #[serde(default)]
    pub token_url: Option<Url>,
    #[serde(default)]
    pub api_base: Option<Url>,
    #[serde(default)]
    pub identity_url: Option<Url>,
    /// Client-side cap on outbound API calls.
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

impl ProviderSettings {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: ClientSecret::new(client_secret.into()),
            redirect_uri,
            scopes: None,
            auth_url: None,
            token_url: None,
            api_base: None,
            identity_url: None,
            rate_limit_per_minute: None,
        }
    }
}

impl Config {
    /// Load from defaults, the TOML file and the environment.
    pub fn load() -> Result<Self, RelayError> {
        let path = std::env::var("RELAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::figment(&path).extract().map_err(RelayError::from)
    }

    pub fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RELAY_").split("__").ignore(&["config"]))
    }

    pub fn provider(&self, provider: Provider) -> Result<&ProviderSettings, RelayError> {
        self.providers
            .get(&provider)
            .ok_or(RelayError::ProviderDisabled(provider))
    }
}
