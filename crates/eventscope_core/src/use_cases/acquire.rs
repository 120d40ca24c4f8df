use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::config::UpstreamSettings;
use crate::credential_store::CredentialStore;
use crate::entities::{AcquisitionState, SurfaceEvent, SurfaceOptions, UrlFilter};
use crate::error::Error;
use crate::interceptor::TrafficInterceptor;
use crate::ports::{LoginSurface, SurfaceProvider};

type Outcome = Option<Result<(), Error>>;

/// Where the login surface points and what traffic it harvests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub login_url: String,
    pub partition: String,
    pub filter: UrlFilter,
    /// Origins whose cookies make up the cookie credential.
    pub cookie_urls: Vec<String>,
}

impl AcquisitionConfig {
    pub fn from_settings(upstream: &UpstreamSettings) -> Result<Self, Error> {
        let api_origin = upstream.api_origin()?;
        let login_origin = upstream.login_origin()?;
        let mut cookie_urls = vec![api_origin.clone()];
        if login_origin != api_origin {
            cookie_urls.push(login_origin);
        }
        Ok(Self {
            login_url: upstream.login_url.clone(),
            partition: upstream.partition.clone(),
            filter: UrlFilter::for_origin(&api_origin),
            cookie_urls,
        })
    }
}

/// Drives interactive logins, at most one at a time per process.
///
/// A request while a login is running waits for that login's outcome instead
/// of opening a second surface. Once settled, callers are served from the
/// credential store until something clears it.
pub struct AcquisitionCoordinator<P: SurfaceProvider> {
    provider: Arc<P>,
    store: Arc<CredentialStore>,
    config: AcquisitionConfig,
    in_flight: Arc<Mutex<Option<watch::Receiver<Outcome>>>>,
}

impl<P: SurfaceProvider> AcquisitionCoordinator<P> {
    pub fn new(provider: Arc<P>, store: Arc<CredentialStore>, config: AcquisitionConfig) -> Self {
        Self {
            provider,
            store,
            config,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub async fn state(&self) -> AcquisitionState {
        match self.in_flight.lock().await.as_ref() {
            Some(pending) if pending.has_changed().is_ok() => AcquisitionState::Capturing,
            _ => AcquisitionState::Idle,
        }
    }

    /// Make sure a credential is cached, running an interactive login if needed.
    ///
    /// `force` drops the cached credential and the surface's stored cookies
    /// first. It does not interrupt a login already in progress.
    #[instrument(skip(self))]
    pub async fn ensure_authenticated(&self, force: bool) -> Result<(), Error> {
        if force {
            self.invalidate().await;
        }

        let mut outcome = {
            let mut slot = self.in_flight.lock().await;
            if self.store.is_valid().await {
                debug!("using cached authentication");
                return Ok(());
            }
            match slot.as_ref() {
                Some(pending) if pending.has_changed().is_ok() => {
                    debug!("joining login already in progress");
                    pending.clone()
                }
                _ => {
                    let pending = self.start_attempt();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map(|value| (*value).clone())
            .map_err(|_| Error::Surface("login ended without an outcome".to_string()))?;

        settled.unwrap_or_else(|| Err(Error::Surface("login ended without an outcome".to_string())))
    }

    /// Forget the cached credential and the login partition's cookies.
    pub async fn invalidate(&self) {
        self.store.clear().await;
        if let Err(e) = self.provider.clear_storage(&self.config.partition).await {
            warn!(error = %e, partition = %self.config.partition, "failed to clear login storage");
        }
    }

    fn start_attempt(&self) -> watch::Receiver<Outcome> {
        let (tx, rx) = watch::channel(None);
        let provider = self.provider.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let in_flight = self.in_flight.clone();

        info!(login_url = %config.login_url, "login triggered");

        tokio::spawn(async move {
            let result = run_attempt(provider.as_ref(), store, &config).await;
            match &result {
                Ok(()) => info!("login completed"),
                Err(e) => warn!(error = %e, "login failed"),
            }
            in_flight.lock().await.take();
            let _ = tx.send(Some(result));
        });

        rx
    }
}

/// One interactive login. Surface and interceptor are torn down before this returns.
async fn run_attempt<P: SurfaceProvider>(
    provider: &P,
    store: Arc<CredentialStore>,
    config: &AcquisitionConfig,
) -> Result<(), Error> {
    let surface = SurfaceGuard(
        provider
            .open(&SurfaceOptions::for_partition(config.partition.clone()))
            .await?,
    );
    let mut interceptor = TrafficInterceptor::attach(
        &*surface,
        config.filter.clone(),
        store.clone(),
        config.cookie_urls.clone(),
    )?;

    surface.navigate(&config.login_url).await?;

    while let Some(event) = interceptor.next_event().await {
        if event == SurfaceEvent::Closed {
            debug!("login surface closed");
            break;
        }
        interceptor.inspect(&event).await;
        if store.is_valid().await {
            return Ok(());
        }
    }

    if store.is_valid().await {
        Ok(())
    } else {
        Err(Error::AbandonedLogin)
    }
}

/// Closes the surface when dropped.
struct SurfaceGuard<S: LoginSurface>(S);

impl<S: LoginSurface> Deref for SurfaceGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

impl<S: LoginSurface> Drop for SurfaceGuard<S> {
    fn drop(&mut self) {
        self.0.close();
    }
}
