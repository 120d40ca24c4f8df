use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

pub const DEFAULT_API_URL: &str =
    "https://api-cus.psav.com/lighthouse-api/production/api/flowsheets/flowsheet/GetActions";
pub const DEFAULT_LOGIN_URL: &str = "https://lighthouse2.psav.com";
pub const DEFAULT_PARTITION: &str = "persist:lighthouse-auth";
pub const DEFAULT_PROXY_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_PROXY_ROUTE: &str = "/lighthouse/getactions";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub upstream: UpstreamSettings,
    pub proxy: ProxySettings,
    pub log_level: String,
}

/// Where the flowsheet API and its login page live.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    pub api_url: String,
    pub login_url: String,
    /// Storage partition of the login surface; reused across runs when the host persists it.
    pub partition: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub bind: String,
    /// Endpoint the forwarder republishes; `upstream.api_url` when unset.
    pub target_url: Option<String>,
    pub route: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            upstream: UpstreamSettings::default(),
            proxy: ProxySettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            partition: DEFAULT_PARTITION.to_string(),
            user_agent: format!("EventScope/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_PROXY_BIND.to_string(),
            target_url: None,
            route: DEFAULT_PROXY_ROUTE.to_string(),
        }
    }
}

impl Settings {
    /// Reject configuration that cannot possibly reach the upstream.
    pub fn validate(&self) -> Result<(), Error> {
        parse_http_url("upstream.api_url", &self.upstream.api_url)?;
        parse_http_url("upstream.login_url", &self.upstream.login_url)?;
        if self.upstream.partition.trim().is_empty() {
            return Err(Error::Configuration(
                "upstream.partition is empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl UpstreamSettings {
    /// Origin of the API endpoint, e.g. `https://api-cus.psav.com`.
    pub fn api_origin(&self) -> Result<String, Error> {
        origin_of("upstream.api_url", &self.api_url)
    }

    /// Origin of the interactive login page.
    pub fn login_origin(&self) -> Result<String, Error> {
        origin_of("upstream.login_url", &self.login_url)
    }
}

impl ProxySettings {
    /// Resolve the forwarding target, falling back to the upstream endpoint.
    pub fn resolve_target(&self, upstream: &UpstreamSettings) -> Result<String, Error> {
        let target = self
            .target_url
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(upstream.api_url.as_str());
        if target.trim().is_empty() {
            return Err(Error::Configuration(
                "proxy target URL is not configured".to_string(),
            ));
        }
        parse_http_url("proxy.target_url", target)?;
        Ok(target.to_string())
    }
}

fn parse_http_url(key: &str, value: &str) -> Result<Url, Error> {
    if value.trim().is_empty() {
        return Err(Error::Configuration(format!("{} is empty", key)));
    }
    let url = Url::parse(value)
        .map_err(|e| Error::Configuration(format!("{} is not a valid URL: {}", key, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Configuration(format!(
            "{} has unsupported scheme {}",
            key, other
        ))),
    }
}

fn origin_of(key: &str, value: &str) -> Result<String, Error> {
    Ok(parse_http_url(key, value)?.origin().ascii_serialization())
}
