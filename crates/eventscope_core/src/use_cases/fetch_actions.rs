use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::credential_store::CredentialStore;
use crate::entities::{AsOf, RequestAuth, UpstreamResponse};
use crate::error::Error;
use crate::ports::{ActionsApi, SurfaceProvider};
use crate::use_cases::AcquisitionCoordinator;

/// First try plus one retry after re-authentication.
pub const MAX_ATTEMPTS: u32 = 2;

/// How the fetcher reacts to an upstream status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 401, 403, or a redirect to the login page.
    AuthFailure,
    Failure,
}

impl StatusClass {
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => StatusClass::Success,
            300..=399 | 401 | 403 => StatusClass::AuthFailure,
            _ => StatusClass::Failure,
        }
    }
}

/// Fetches flowsheet actions, re-running the interactive login once when the
/// upstream rejects the cached credential.
pub struct FetchActionsUseCase<P, A>
where
    P: SurfaceProvider,
    A: ActionsApi,
{
    coordinator: Arc<AcquisitionCoordinator<P>>,
    store: Arc<CredentialStore>,
    api: Arc<A>,
    clock: Clock,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

impl<P, A> FetchActionsUseCase<P, A>
where
    P: SurfaceProvider,
    A: ActionsApi,
{
    pub fn new(coordinator: Arc<AcquisitionCoordinator<P>>, api: Arc<A>) -> Self {
        let store = coordinator.store().clone();
        Self {
            coordinator,
            store,
            api,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock that stands in for an absent or unusable date.
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Fetch actions for `date_input`, which may be absent.
    ///
    /// Flow:
    /// 1. Ensure a credential (forced on the retry)
    /// 2. Normalize the date against the clock after the login, then send the
    ///    credential, bearer token preferred over cookies
    /// 3. On 401/403/3xx invalidate and go around once more
    /// 4. Anything else non-2xx, or a body that is not JSON, is an upstream error
    #[instrument(skip(self))]
    pub async fn execute(&self, date_input: Option<&str>) -> Result<Value, Error> {
        let mut last_status = 0;

        for attempt in 0..MAX_ATTEMPTS {
            self.coordinator.ensure_authenticated(attempt > 0).await?;

            let as_of = AsOf::normalize_at(date_input, (self.clock)());

            let auth = RequestAuth::from_credential(&self.store.get().await);
            info!(as_of = %as_of, attempt, auth = auth.kind(), "fetching actions");

            let response = self.api.get_actions(&as_of, &auth).await?;

            match StatusClass::of(response.status) {
                StatusClass::Success => {
                    let payload = parse_payload(&response, attempt + 1)?;
                    info!(as_of = %as_of, "returning payload");
                    return Ok(payload);
                }
                StatusClass::AuthFailure => {
                    warn!(status = response.status, attempt, "upstream rejected credentials");
                    self.store.clear().await;
                    last_status = response.status;
                }
                StatusClass::Failure => {
                    return Err(Error::upstream(response.status, attempt + 1, &response.body));
                }
            }
        }

        Err(Error::Authentication {
            status: last_status,
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Entry point for desktop callers, which must always name a date.
    pub async fn execute_required(&self, date_input: Option<&str>) -> Result<Value, Error> {
        match date_input.map(str::trim).filter(|d| !d.is_empty()) {
            Some(date) => self.execute(Some(date)).await,
            None => Err(Error::Other(
                "a date string is required for the actions sync".to_string(),
            )),
        }
    }
}

fn parse_payload(response: &UpstreamResponse, attempt: u32) -> Result<Value, Error> {
    if let Some(content_type) = &response.content_type {
        if !content_type.to_ascii_lowercase().contains("json") {
            return Err(Error::upstream(response.status, attempt, &response.body));
        }
    }
    serde_json::from_str(&response.body)
        .map_err(|_| Error::upstream(response.status, attempt, &response.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Credential, CredentialEvent};
    use crate::testing::{
        completed_request, token_request, upstream_settings, FakeProvider, ScriptedApi,
        API_ORIGIN,
    };
    use crate::use_cases::AcquisitionConfig;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn use_case(
        provider: &FakeProvider,
        api: ScriptedApi,
    ) -> (FetchActionsUseCase<FakeProvider, ScriptedApi>, Arc<ScriptedApi>) {
        let store = Arc::new(CredentialStore::new());
        use_case_with_store(provider, api, store)
    }

    fn use_case_with_store(
        provider: &FakeProvider,
        api: ScriptedApi,
        store: Arc<CredentialStore>,
    ) -> (FetchActionsUseCase<FakeProvider, ScriptedApi>, Arc<ScriptedApi>) {
        let config = AcquisitionConfig::from_settings(&upstream_settings()).unwrap();
        let coordinator = Arc::new(AcquisitionCoordinator::new(
            Arc::new(provider.clone()),
            store,
            config,
        ));
        let api = Arc::new(api);
        (FetchActionsUseCase::new(coordinator, api.clone()), api)
    }

    #[rstest]
    #[case(200, StatusClass::Success)]
    #[case(204, StatusClass::Success)]
    #[case(302, StatusClass::AuthFailure)]
    #[case(401, StatusClass::AuthFailure)]
    #[case(403, StatusClass::AuthFailure)]
    #[case(404, StatusClass::Failure)]
    #[case(500, StatusClass::Failure)]
    fn test_status_class(#[case] status: u16, #[case] expected: StatusClass) {
        assert_eq!(StatusClass::of(status), expected);
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent_without_cookie() {
        let provider = FakeProvider::new().with_script(vec![token_request("Bearer abc")]);
        let (use_case, api) = use_case(&provider, ScriptedApi::always(UpstreamResponse::json(200, r#"{"items":[1]}"#)));

        let payload = use_case.execute(Some("2024-03-05")).await.unwrap();

        assert_eq!(payload, json!({"items": [1]}));
        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "2024-03-05T00:00:00.000Z");
        assert_eq!(calls[0].1, RequestAuth::Bearer("Bearer abc".to_string()));
    }

    #[tokio::test]
    async fn test_cookie_only_capture_is_sent_as_cookie() {
        let provider = FakeProvider::new()
            .with_cookie(API_ORIGIN, "sid", "123")
            .with_script(vec![completed_request()]);
        let (use_case, api) = use_case(&provider, ScriptedApi::always(UpstreamResponse::json(200, "[]")));

        use_case.execute(Some("2024-03-05T14:30:00Z")).await.unwrap();

        let calls = api.calls();
        assert_eq!(calls[0].0, "2024-03-05T14:30:00.000Z");
        assert_eq!(calls[0].1, RequestAuth::Cookie("sid=123".to_string()));
    }

    #[tokio::test]
    async fn test_forbidden_then_success_retries_once() {
        let provider = FakeProvider::new()
            .with_script(vec![token_request("Bearer stale")])
            .with_script(vec![token_request("Bearer fresh")]);
        let (use_case, api) = use_case(
            &provider,
            ScriptedApi::replying(vec![
                UpstreamResponse::json(403, "forbidden"),
                UpstreamResponse::json(200, r#"{"items":[]}"#),
            ]),
        );

        let payload = use_case.execute(Some("2024-03-05")).await.unwrap();

        assert_eq!(payload, json!({"items": []}));
        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, RequestAuth::Bearer("Bearer fresh".to_string()));
        assert_eq!(provider.opened(), 2);
    }

    #[tokio::test]
    async fn test_persistent_unauthorized_stops_after_two_calls() {
        let provider = FakeProvider::new()
            .with_script(vec![token_request("Bearer one")])
            .with_script(vec![token_request("Bearer two")]);
        let store = Arc::new(CredentialStore::new());
        let (use_case, api) = use_case_with_store(
            &provider,
            ScriptedApi::always(UpstreamResponse::json(401, "unauthorized")),
            store.clone(),
        );

        let err = use_case.execute(None).await.unwrap_err();

        assert_eq!(
            err,
            Error::Authentication {
                status: 401,
                attempts: 2
            }
        );
        assert_eq!(api.calls().len(), 2);
        assert!(!store.is_valid().await);
    }

    #[tokio::test]
    async fn test_credential_cleared_before_second_login() {
        let store = Arc::new(CredentialStore::new());
        let provider = FakeProvider::new()
            .with_script(vec![token_request("Bearer stale")])
            .with_script(vec![token_request("Bearer fresh")])
            .observing(store.clone());
        let mut events = store.subscribe();
        let (use_case, _api) = use_case_with_store(
            &provider,
            ScriptedApi::replying(vec![
                UpstreamResponse::json(401, ""),
                UpstreamResponse::json(200, "{}"),
            ]),
            store.clone(),
        );

        use_case.execute(Some("2024-03-05")).await.unwrap();

        assert_eq!(provider.store_valid_at_open(), vec![false, false]);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let cleared = seen
            .iter()
            .position(|e| *e == CredentialEvent::Cleared)
            .expect("store was cleared");
        let captured_after = seen[cleared..]
            .iter()
            .any(|e| matches!(e, CredentialEvent::Captured { token: true, .. }));
        assert!(captured_after);
    }

    #[tokio::test]
    async fn test_redirect_counts_as_auth_failure() {
        let provider = FakeProvider::new()
            .with_script(vec![token_request("Bearer one")])
            .with_script(vec![token_request("Bearer two")]);
        let (use_case, api) = use_case(
            &provider,
            ScriptedApi::always(UpstreamResponse {
                status: 302,
                content_type: None,
                body: String::new(),
            }),
        );

        let err = use_case.execute(Some("2024-03-05")).await.unwrap_err();

        assert_eq!(
            err,
            Error::Authentication {
                status: 302,
                attempts: 2
            }
        );
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let provider = FakeProvider::new().with_script(vec![token_request("Bearer abc")]);
        let (use_case, api) = use_case(
            &provider,
            ScriptedApi::always(UpstreamResponse::json(500, "database unavailable")),
        );

        let err = use_case.execute(Some("2024-03-05")).await.unwrap_err();

        assert_eq!(err, Error::upstream(500, 1, "database unavailable"));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_on_retry_reports_second_attempt() {
        let provider = FakeProvider::new()
            .with_script(vec![token_request("Bearer stale")])
            .with_script(vec![token_request("Bearer fresh")]);
        let (use_case, _api) = use_case(
            &provider,
            ScriptedApi::replying(vec![
                UpstreamResponse::json(401, ""),
                UpstreamResponse::json(502, "bad gateway"),
            ]),
        );

        let err = use_case.execute(Some("2024-03-05")).await.unwrap_err();

        assert_eq!(err, Error::upstream(502, 2, "bad gateway"));
    }

    #[tokio::test]
    async fn test_absent_date_is_taken_after_each_login() {
        let provider = FakeProvider::new()
            .with_script(vec![token_request("Bearer stale")])
            .with_script(vec![token_request("Bearer fresh")]);
        let (use_case, api) = use_case(
            &provider,
            ScriptedApi::replying(vec![
                UpstreamResponse::json(401, ""),
                UpstreamResponse::json(200, "{}"),
            ]),
        );
        let ticks = Arc::new(AtomicI64::new(0));
        let clock_ticks = ticks.clone();
        let observed = provider.clone();
        let use_case = use_case.with_clock(move || {
            // Each read happens once a login has opened a surface.
            assert!(observed.opened() as i64 > clock_ticks.load(Ordering::SeqCst));
            let tick = clock_ticks.fetch_add(1, Ordering::SeqCst);
            Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap() + chrono::Duration::hours(tick)
        });

        use_case.execute(None).await.unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        let as_ofs: Vec<String> = api.calls().into_iter().map(|(as_of, _)| as_of).collect();
        assert_eq!(
            as_ofs,
            vec!["2024-03-05T09:00:00.000Z", "2024-03-05T10:00:00.000Z"]
        );
    }

    #[tokio::test]
    async fn test_invalid_json_is_upstream_error() {
        let provider = FakeProvider::new().with_script(vec![token_request("Bearer abc")]);
        let (use_case, _api) = use_case(
            &provider,
            ScriptedApi::always(UpstreamResponse::json(200, "<html>")),
        );

        let err = use_case.execute(Some("2024-03-05")).await.unwrap_err();

        assert_eq!(err, Error::upstream(200, 1, "<html>"));
    }

    #[tokio::test]
    async fn test_html_content_type_is_upstream_error() {
        let provider = FakeProvider::new().with_script(vec![token_request("Bearer abc")]);
        let (use_case, _api) = use_case(
            &provider,
            ScriptedApi::always(UpstreamResponse {
                status: 200,
                content_type: Some("text/html; charset=utf-8".to_string()),
                body: "{}".to_string(),
            }),
        );

        let err = use_case.execute(Some("2024-03-05")).await.unwrap_err();

        assert!(matches!(err, Error::Upstream { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_abandoned_login_skips_fetch() {
        let provider =
            FakeProvider::new().with_script(vec![crate::entities::SurfaceEvent::Closed]);
        let (use_case, api) = use_case(&provider, ScriptedApi::always(UpstreamResponse::json(200, "{}")));

        let err = use_case.execute(Some("2024-03-05")).await.unwrap_err();

        assert_eq!(err, Error::AbandonedLogin);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cached_credential_skips_login() {
        let store = Arc::new(CredentialStore::new());
        store.set(Credential::cookies("sid=cached")).await;
        let provider = FakeProvider::new();
        let (use_case, api) = use_case_with_store(
            &provider,
            ScriptedApi::always(UpstreamResponse::json(200, "{}")),
            store,
        );

        use_case.execute(Some("2024-03-05")).await.unwrap();

        assert_eq!(provider.opened(), 0);
        assert_eq!(api.calls()[0].1, RequestAuth::Cookie("sid=cached".to_string()));
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("  "))]
    #[tokio::test]
    async fn test_execute_required_rejects_missing_date(#[case] input: Option<&str>) {
        let provider = FakeProvider::new();
        let (use_case, api) = use_case(&provider, ScriptedApi::always(UpstreamResponse::json(200, "{}")));

        let err = use_case.execute_required(input).await.unwrap_err();

        assert!(matches!(err, Error::Other(_)));
        assert_eq!(provider.opened(), 0);
        assert!(api.calls().is_empty());
    }
}
