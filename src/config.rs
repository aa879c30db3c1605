//! Host-side configuration: proxy routing for native HTTP calls.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Environment variable read by [`Config::from_env`]
pub const PROXY_URL_ENV: &str = "XHR_PROXY_URL";

const SUPPORTED_PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidProxyUrl(String),
    UnsupportedProxyScheme(String),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidProxyUrl(msg) => write!(f, "Invalid proxy URL: {}", msg),
            ConfigError::UnsupportedProxyScheme(scheme) => {
                write!(f, "Unsupported proxy scheme: {}", scheme)
            }
            ConfigError::Parse(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Proxy given as parts, e.g. from a settings screen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub scheme: String,
    /// `host:port`
    pub host: String,
    #[serde(default, alias = "usr")]
    pub username: Option<String>,
    #[serde(default, alias = "pwd")]
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Render as a proxy URL; credentials are percent-encoded into the
    /// userinfo part when either is non-empty
    pub fn to_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&format!("{}://{}", self.scheme, self.host))
            .map_err(|e| ConfigError::InvalidProxyUrl(e.to_string()))?;

        let username = self.username.as_deref().unwrap_or("");
        let password = self.password.as_deref().unwrap_or("");

        if !username.is_empty() || !password.is_empty() {
            url.set_username(username)
                .map_err(|_| ConfigError::InvalidProxyUrl("URL cannot carry credentials".into()))?;
            url.set_password(Some(password))
                .map_err(|_| ConfigError::InvalidProxyUrl("URL cannot carry credentials".into()))?;
        }

        Ok(url)
    }
}

/// Proxy setting as it appears in configuration files: either a URL string or
/// structured parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxySetting {
    Url(String),
    Parts(ProxyConfig),
}

impl ProxySetting {
    pub fn to_url(&self) -> Result<Url, ConfigError> {
        match self {
            ProxySetting::Url(raw) => {
                Url::parse(raw).map_err(|e| ConfigError::InvalidProxyUrl(e.to_string()))
            }
            ProxySetting::Parts(parts) => parts.to_url(),
        }
    }
}

/// Configuration handed to the runtime by the host application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, alias = "proxyUrl")]
    pub proxy: Option<ProxySetting>,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read the proxy from `XHR_PROXY_URL`; unset or empty means direct
    pub fn from_env() -> Self {
        let proxy = std::env::var(PROXY_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(ProxySetting::Url);

        Self { proxy }
    }

    /// Resolve into the transport configuration injected into every request
    /// object
    pub fn transport(&self) -> Result<TransportConfig, ConfigError> {
        match &self.proxy {
            Some(setting) => TransportConfig::with_proxy(setting.to_url()?),
            None => Ok(TransportConfig::direct()),
        }
    }
}

/// Routing policy for the native calls of one request object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportConfig {
    proxy: Option<Url>,
}

impl TransportConfig {
    pub fn direct() -> Self {
        Self { proxy: None }
    }

    pub fn with_proxy(url: Url) -> Result<Self, ConfigError> {
        if !SUPPORTED_PROXY_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::UnsupportedProxyScheme(url.scheme().to_string()));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidProxyUrl(format!("{} has no host", url)));
        }

        Ok(Self { proxy: Some(url) })
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    /// Build the native client.
    ///
    /// A zero `timeout_ms` arms no deadline. Without a proxy the client
    /// ignores the process proxy environment and connects directly.
    pub fn build_client(&self, timeout_ms: u64) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder();

        builder = match &self.proxy {
            Some(url) => builder.proxy(reqwest::Proxy::all(url.clone())?),
            None => builder.no_proxy(),
        };

        if timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }

        builder.build()
    }
}
