//! In-memory fakes of the ports for use-case tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::UpstreamSettings;
use crate::credential_store::CredentialStore;
use crate::entities::{
    AsOf, RequestAuth, SessionCookie, SurfaceEvent, SurfaceOptions, UpstreamResponse, UrlFilter,
};
use crate::error::Error;
use crate::ports::{ActionsApi, LoginSurface, SurfaceProvider};

pub const API_ORIGIN: &str = "https://api.example.com";
pub const API_URL: &str = "https://api.example.com/flowsheet/GetActions";
pub const LOGIN_ORIGIN: &str = "https://login.example.com";

pub fn upstream_settings() -> UpstreamSettings {
    UpstreamSettings {
        api_url: API_URL.to_string(),
        login_url: LOGIN_ORIGIN.to_string(),
        ..UpstreamSettings::default()
    }
}

pub fn token_request(token: &str) -> SurfaceEvent {
    SurfaceEvent::RequestSent {
        url: API_URL.to_string(),
        headers: vec![("Authorization".to_string(), token.to_string())],
    }
}

pub fn completed_request() -> SurfaceEvent {
    SurfaceEvent::RequestCompleted {
        url: API_URL.to_string(),
        status: 200,
    }
}

#[derive(Default)]
struct Inner {
    log: Mutex<Vec<String>>,
    jar: Mutex<Vec<(String, SessionCookie)>>,
    failing_cookies: Mutex<Vec<String>>,
    scripts: Mutex<VecDeque<Vec<SurfaceEvent>>>,
    sender: Mutex<Option<mpsc::UnboundedSender<SurfaceEvent>>>,
    opened: AtomicUsize,
    fail_open: AtomicBool,
    fail_navigate: AtomicBool,
    observed_store: Mutex<Option<Arc<CredentialStore>>>,
    store_valid_at_open: Mutex<Vec<bool>>,
}

/// Login surface provider driven by per-open scripts or manual `emit` calls.
#[derive(Clone, Default)]
pub struct FakeProvider {
    inner: Arc<Inner>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(self, origin: &str, name: &str, value: &str) -> Self {
        self.inner
            .jar
            .lock()
            .unwrap()
            .push((origin.to_string(), SessionCookie::new(name, value)));
        self
    }

    pub fn failing_cookies_for(self, origin: &str) -> Self {
        self.inner
            .failing_cookies
            .lock()
            .unwrap()
            .push(origin.to_string());
        self
    }

    /// Events replayed after navigation, one script per opened surface.
    pub fn with_script(self, events: Vec<SurfaceEvent>) -> Self {
        self.inner.scripts.lock().unwrap().push_back(events);
        self
    }

    pub fn failing_open(self) -> Self {
        self.inner.fail_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_navigate(self) -> Self {
        self.inner.fail_navigate.store(true, Ordering::SeqCst);
        self
    }

    /// Record whether `store` held a credential each time a surface opens.
    pub fn observing(self, store: Arc<CredentialStore>) -> Self {
        *self.inner.observed_store.lock().unwrap() = Some(store);
        self
    }

    pub fn emit(&self, event: SurfaceEvent) -> bool {
        match self.inner.sender.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn is_intercepting(&self) -> bool {
        self.inner.sender.lock().unwrap().is_some()
    }

    pub fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }

    pub fn store_valid_at_open(&self) -> Vec<bool> {
        self.inner.store_valid_at_open.lock().unwrap().clone()
    }

    fn record(&self, entry: &str) {
        self.inner.log.lock().unwrap().push(entry.to_string());
    }
}

#[async_trait]
impl SurfaceProvider for FakeProvider {
    type Surface = FakeSurface;

    async fn open(&self, _options: &SurfaceOptions) -> Result<FakeSurface, Error> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Surface("display unavailable".to_string()));
        }
        let store = self.inner.observed_store.lock().unwrap().clone();
        if let Some(store) = store {
            let valid = store.is_valid().await;
            self.inner.store_valid_at_open.lock().unwrap().push(valid);
        }
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        self.record("open");
        Ok(FakeSurface {
            provider: self.clone(),
            closed: AtomicBool::new(false),
        })
    }

    async fn clear_storage(&self, _partition: &str) -> Result<(), Error> {
        self.record("clear_storage");
        self.inner.jar.lock().unwrap().clear();
        Ok(())
    }
}

pub struct FakeSurface {
    provider: FakeProvider,
    closed: AtomicBool,
}

#[async_trait]
impl LoginSurface for FakeSurface {
    fn intercept(
        &self,
        _filter: &UrlFilter,
    ) -> Result<mpsc::UnboundedReceiver<SurfaceEvent>, Error> {
        let mut sender = self.provider.inner.sender.lock().unwrap();
        if sender.is_some() {
            return Err(Error::Surface("interceptor already registered".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *sender = Some(tx);
        drop(sender);
        self.provider.record("intercept");
        Ok(rx)
    }

    fn release_interceptor(&self) {
        if self.provider.inner.sender.lock().unwrap().take().is_some() {
            self.provider.record("release");
        }
    }

    async fn navigate(&self, _url: &str) -> Result<(), Error> {
        self.provider.record("navigate");
        if self.provider.inner.fail_navigate.load(Ordering::SeqCst) {
            return Err(Error::Surface("navigation failed".to_string()));
        }
        let script = self.provider.inner.scripts.lock().unwrap().pop_front();
        for event in script.unwrap_or_default() {
            self.provider.emit(event);
        }
        Ok(())
    }

    async fn cookies(&self, url: &str) -> Result<Vec<SessionCookie>, Error> {
        let inner = &self.provider.inner;
        if inner
            .failing_cookies
            .lock()
            .unwrap()
            .iter()
            .any(|origin| url.starts_with(origin.as_str()))
        {
            return Err(Error::Surface("cookie jar locked".to_string()));
        }
        Ok(inner
            .jar
            .lock()
            .unwrap()
            .iter()
            .filter(|(origin, _)| url.starts_with(origin.as_str()))
            .map(|(_, cookie)| cookie.clone())
            .collect())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.provider.record("close");
        }
    }
}

/// Upstream that replays canned responses and records every call.
#[derive(Default)]
pub struct ScriptedApi {
    responses: Mutex<VecDeque<UpstreamResponse>>,
    fallback: Option<UpstreamResponse>,
    calls: Mutex<Vec<(String, RequestAuth)>>,
}

impl ScriptedApi {
    pub fn replying(responses: Vec<UpstreamResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn always(response: UpstreamResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, RequestAuth)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionsApi for ScriptedApi {
    async fn get_actions(
        &self,
        as_of: &AsOf,
        auth: &RequestAuth,
    ) -> Result<UpstreamResponse, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((as_of.to_string(), auth.clone()));
        let next = self.responses.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| Error::Network("no scripted response left".to_string()))
    }
}
