//! Shared HTTP client configuration for network operations.
//!
//! Provides factory functions for creating properly configured HTTP clients
//! with appropriate timeouts, user agents, and settings for different use cases.

use std::time::Duration;

use eventscope_core::Error;
use reqwest::{redirect, Client};

/// Default timeout for HTTP requests (30 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent used by the proxy when the caller sent none
pub const PROXY_USER_AGENT: &str = "Eventscope-Proxy";

/// Build a configured HTTP client for flowsheet API requests.
///
/// This client is configured with:
/// - Cookie store disabled (the harvested cookie header is attached by hand)
/// - Redirects disabled, so a bounce to the login page surfaces as 3xx
/// - Request and connect timeouts
pub fn build_upstream_client(user_agent: &str, timeout: Duration) -> Result<Client, Error> {
    Client::builder()
        .cookie_store(false)
        .redirect(redirect::Policy::none())
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Network(format!("failed to create upstream HTTP client: {}", e)))
}

/// Build a configured HTTP client for the proxy forwarder.
///
/// Same as the upstream client but without a fixed user agent; the caller's
/// agent is forwarded per request.
pub fn build_proxy_client() -> Result<Client, Error> {
    Client::builder()
        .cookie_store(false)
        .redirect(redirect::Policy::none())
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Network(format!("failed to create proxy HTTP client: {}", e)))
}
