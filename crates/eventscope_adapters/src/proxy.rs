//! Local HTTP forwarder that republishes the flowsheet endpoint to browser
//! callers on other origins.
//!
//! The forwarder is stateless: it never logs in by itself. Callers either send
//! their own `Cookie`/`Authorization` headers, or hand a token to `/set-auth`
//! once and let the forwarder replay it from an HTTP-only cookie.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use eventscope_core::config::Settings;
use eventscope_core::Error;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::network::{build_proxy_client, PROXY_USER_AGENT};

/// Cookie holding the token submitted through `/set-auth`.
pub const AUTH_COOKIE: &str = "eventscope_auth";

const BEARER_PREFIX: &str = "Bearer ";

const X_AUTH_TOKEN: &str = "x-auth-token";

/// Upstream response headers that are never copied back to the caller.
const DROPPED_RESPONSE_HEADERS: &[&str] = &[
    "access-control-allow-origin",
    "access-control-allow-credentials",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

struct ForwardTarget {
    client: Client,
    url: Url,
}

pub struct ProxyForwarder {
    target: Arc<ForwardTarget>,
    route: String,
    running: Arc<AtomicBool>,
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ProxyForwarder {
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        let target = settings.proxy.resolve_target(&settings.upstream)?;
        let url = Url::parse(&target)
            .map_err(|e| Error::Configuration(format!("invalid proxy target: {}", e)))?;
        if !settings.proxy.route.starts_with('/') {
            return Err(Error::Configuration(format!(
                "proxy.route must start with '/': {}",
                settings.proxy.route
            )));
        }

        Ok(Self {
            target: Arc::new(ForwardTarget {
                client: build_proxy_client()?,
                url,
            }),
            route: settings.proxy.route.clone(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Arc::new(Mutex::new(None)),
        })
    }

    pub fn target(&self) -> &str {
        self.target.url.as_str()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.route, get(forward).options(preflight_read))
            .route("/set-auth", post(set_auth).options(preflight_write))
            .route("/clear-auth", post(clear_auth).options(preflight_write))
            .layer(middleware::from_fn(apply_cors))
            .with_state(self.target.clone())
    }

    /// Bind `bind` and serve in the background. Returns the bound address.
    pub async fn start(&self, bind: &str) -> Result<SocketAddr, Error> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::Proxy("proxy already running".to_string()));
        }

        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| Error::Proxy(format!("failed to bind {}: {}", bind, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Proxy(format!("failed to read bound address: {}", e)))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let app = self.router();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        info!(%addr, route = %self.route, target = %self.target.url, "proxy listening");

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    debug!("proxy shutting down");
                })
                .await
            {
                warn!(error = %e, "proxy server stopped with error");
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(addr)
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn apply_cors(request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("null"));

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    response
}

async fn preflight_read(headers: HeaderMap) -> Response {
    preflight(&headers, "GET,OPTIONS")
}

async fn preflight_write(headers: HeaderMap) -> Response {
    preflight(&headers, "POST,OPTIONS")
}

fn preflight(headers: &HeaderMap, allow_methods: &'static str) -> Response {
    let allow_headers = headers
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("Content-Type, Authorization"));

    (
        StatusCode::NO_CONTENT,
        [
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(allow_methods),
            ),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, allow_headers),
        ],
    )
        .into_response()
}

#[instrument(skip_all, fields(query = uri.query().unwrap_or("")))]
async fn forward(
    State(target): State<Arc<ForwardTarget>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    match forward_request(&target, uri.query(), &headers).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "failed to proxy request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to proxy request" })),
            )
                .into_response()
        }
    }
}

async fn forward_request(
    target: &ForwardTarget,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<Response, Error> {
    let mut url = target.url.clone();
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.set_query(Some(query));
    }

    let mut request = target.client.get(url).header(
        header::USER_AGENT,
        headers
            .get(header::USER_AGENT)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(PROXY_USER_AGENT)),
    );
    request = request.header(
        header::ACCEPT,
        headers
            .get(header::ACCEPT)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json")),
    );
    if let Some(cookie) = headers.get(header::COOKIE) {
        request = request.header(header::COOKIE, cookie.clone());
    }
    if let Some(token) = headers.get(X_AUTH_TOKEN) {
        request = request.header(X_AUTH_TOKEN, token.clone());
    }
    match headers.get(header::AUTHORIZATION) {
        Some(authorization) => {
            request = request.header(header::AUTHORIZATION, authorization.clone());
        }
        None => {
            if let Some(token) = stored_token(headers) {
                debug!("using token from auth cookie");
                request =
                    request.header(header::AUTHORIZATION, format!("{}{}", BEARER_PREFIX, token));
            }
        }
    }

    let upstream = request
        .send()
        .await
        .map_err(|e| Error::Network(format!("upstream request failed: {}", e)))?;

    let status = upstream.status();
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if !DROPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    let body = upstream
        .bytes()
        .await
        .map_err(|e| Error::Network(format!("failed to read upstream body: {}", e)))?;

    debug!(status = status.as_u16(), body_len = body.len(), "proxied response");

    builder
        .body(Body::from(body))
        .map_err(|e| Error::Proxy(format!("failed to build response: {}", e)))
}

/// Token stored by `/set-auth`, if the caller carries the cookie.
fn stored_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == AUTH_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[derive(Debug, Deserialize)]
struct SetAuthRequest {
    token: Option<String>,
}

async fn set_auth(Json(request): Json<SetAuthRequest>) -> Response {
    let token = request
        .token
        .as_deref()
        .and_then(|t| t.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty() && t.chars().all(is_cookie_safe));

    let Some(token) = token else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "token must be a Bearer token" })),
        )
            .into_response();
    };

    info!("auth token stored in cookie");
    (
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            format!("{}={}; HttpOnly; SameSite=Lax; Path=/", AUTH_COOKIE, token),
        )],
        Json(json!({ "ok": true })),
    )
        .into_response()
}

async fn clear_auth() -> Response {
    info!("auth cookie cleared");
    (
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", AUTH_COOKIE),
        )],
        Json(json!({ "ok": true })),
    )
        .into_response()
}

fn is_cookie_safe(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, ';' | ',' | '"' | '\\')
}
