use std::time::Duration;

use async_trait::async_trait;
use eventscope_core::config::UpstreamSettings;
use eventscope_core::entities::{AsOf, RequestAuth, UpstreamResponse};
use eventscope_core::ports::ActionsApi;
use eventscope_core::Error;
use reqwest::{header, Client};
use tracing::{debug, instrument};

use crate::network::build_upstream_client;

/// reqwest client for the flowsheet `GetActions` endpoint
pub struct HttpActionsApi {
    client: Client,
    api_url: String,
}

impl HttpActionsApi {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, Error> {
        if settings.api_url.trim().is_empty() {
            return Err(Error::Configuration("upstream.api_url is empty".to_string()));
        }
        let client = build_upstream_client(
            &settings.user_agent,
            Duration::from_secs(settings.timeout_secs),
        )?;
        Ok(Self {
            client,
            api_url: settings.api_url.clone(),
        })
    }
}

#[async_trait]
impl ActionsApi for HttpActionsApi {
    #[instrument(skip(self, auth), fields(auth = auth.kind()))]
    async fn get_actions(
        &self,
        as_of: &AsOf,
        auth: &RequestAuth,
    ) -> Result<UpstreamResponse, Error> {
        let mut request = self
            .client
            .get(&self.api_url)
            .query(&[("asOf", as_of.to_string())])
            .header(header::ACCEPT, "application/json");

        request = match auth {
            RequestAuth::Bearer(token) => request.header(header::AUTHORIZATION, token),
            RequestAuth::Cookie(cookie) => {
                debug!(cookie_len = cookie.len(), "using cookie header");
                request.header(header::COOKIE, cookie)
            }
            RequestAuth::Anonymous => {
                debug!("proceeding without authorization or cookie headers");
                request
            }
        };

        debug!(url = %self.api_url, as_of = %as_of, "requesting GetActions");

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("GetActions request failed: {}", e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read GetActions response: {}", e)))?;

        debug!(status, body_len = body.len(), "GetActions responded");

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
