use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::entities::{
    AsOf, RequestAuth, SessionCookie, SurfaceEvent, SurfaceOptions, UpstreamResponse, UrlFilter,
};
use crate::error::Error;

// ============================================================================
// Login Surface Ports
// ============================================================================

/// Opens interactive login surfaces (a browser window, a webview, a terminal prompt).
#[async_trait]
pub trait SurfaceProvider: Send + Sync + 'static {
    type Surface: LoginSurface;

    /// Open a new surface. It stays hidden until it has content to show when
    /// `options.hidden_until_ready` is set.
    async fn open(&self, options: &SurfaceOptions) -> Result<Self::Surface, Error>;

    /// Drop cookies stored in `partition`.
    async fn clear_storage(&self, partition: &str) -> Result<(), Error>;
}

/// A single open login surface.
#[async_trait]
pub trait LoginSurface: Send + Sync + 'static {
    /// Start observing traffic matching `filter`.
    ///
    /// The returned channel also carries [`SurfaceEvent::Closed`]. Only one
    /// interceptor may be registered at a time.
    fn intercept(&self, filter: &UrlFilter) -> Result<mpsc::UnboundedReceiver<SurfaceEvent>, Error>;

    /// Stop observing traffic. Must be safe to call more than once.
    fn release_interceptor(&self);

    /// Load `url` in the surface.
    async fn navigate(&self, url: &str) -> Result<(), Error>;

    /// Cookies the surface holds for `url`.
    async fn cookies(&self, url: &str) -> Result<Vec<SessionCookie>, Error>;

    /// Close the surface. Must be safe to call on an already closed surface.
    fn close(&self);
}

// ============================================================================
// Upstream Ports
// ============================================================================

/// The flowsheet `GetActions` endpoint.
#[async_trait]
pub trait ActionsApi: Send + Sync + 'static {
    /// Issue one request. Any HTTP status is returned as a response; only
    /// transport failures are errors.
    async fn get_actions(&self, as_of: &AsOf, auth: &RequestAuth)
        -> Result<UpstreamResponse, Error>;
}
