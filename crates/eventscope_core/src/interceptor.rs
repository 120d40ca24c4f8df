//! Passive observation of login-surface traffic.
//!
//! The interceptor never touches the requests it sees. It only copies an
//! `Authorization` header or the surface's cookies into the credential store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credential_store::CredentialStore;
use crate::entities::{cookie_header, Credential, SessionCookie, SurfaceEvent, UrlFilter};
use crate::error::Error;
use crate::ports::LoginSurface;

/// Interceptor registration on a login surface.
///
/// Registration lasts exactly as long as this value; dropping it releases the
/// surface's interceptor on every exit path.
pub struct TrafficInterceptor<'s, S: LoginSurface> {
    surface: &'s S,
    events: mpsc::UnboundedReceiver<SurfaceEvent>,
    filter: UrlFilter,
    store: Arc<CredentialStore>,
    cookie_urls: Vec<String>,
}

impl<'s, S: LoginSurface> TrafficInterceptor<'s, S> {
    /// Register on `surface` for requests matching `filter`. Cookies are read
    /// for each of `cookie_urls` after every matching request.
    pub fn attach(
        surface: &'s S,
        filter: UrlFilter,
        store: Arc<CredentialStore>,
        cookie_urls: Vec<String>,
    ) -> Result<Self, Error> {
        let events = surface.intercept(&filter)?;
        debug!(filter = filter.pattern(), "interceptor attached");
        Ok(Self {
            surface,
            events,
            filter,
            store,
            cookie_urls,
        })
    }

    /// Next event from the surface, `None` once the surface is gone.
    pub async fn next_event(&mut self) -> Option<SurfaceEvent> {
        self.events.recv().await
    }

    /// Harvest whatever credential material `event` exposes.
    pub async fn inspect(&self, event: &SurfaceEvent) {
        match event {
            SurfaceEvent::RequestSent { url, headers } => {
                if !self.filter.matches(url) {
                    return;
                }
                if let Some(token) = authorization_header(headers) {
                    info!("token captured from request headers");
                    self.store.set(Credential::bearer(token)).await;
                }
                self.capture_cookies().await;
            }
            SurfaceEvent::RequestCompleted { url, status } => {
                if !self.filter.matches(url) {
                    return;
                }
                debug!(status, "intercepted request completed");
                let had_cookie = self.store.get().await.has_cookie();
                self.capture_cookies().await;
                if !had_cookie && self.store.get().await.has_cookie() {
                    info!("session cookies captured");
                }
            }
            SurfaceEvent::Closed => {}
        }
    }

    async fn capture_cookies(&self) {
        let mut cookies: Vec<SessionCookie> = Vec::new();
        for url in &self.cookie_urls {
            match self.surface.cookies(url).await {
                Ok(found) => cookies.extend(found),
                Err(e) => warn!(error = %e, url = %url, "unable to read login cookies"),
            }
        }
        if !cookies.is_empty() {
            self.store
                .set(Credential::cookies(cookie_header(&cookies)))
                .await;
        }
    }
}

impl<S: LoginSurface> Drop for TrafficInterceptor<'_, S> {
    fn drop(&mut self) {
        self.surface.release_interceptor();
        debug!("interceptor released");
    }
}

/// Case-insensitive lookup of a non-empty `Authorization` header.
pub fn authorization_header(headers: &[(String, String)]) -> Option<String> {
    headers
        .iter()
        .find(|(name, value)| name.eq_ignore_ascii_case("authorization") && !value.is_empty())
        .map(|(_, value)| value.clone())
}
