use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Credentials
// ============================================================================

/// Credential harvested from an interactive login session.
///
/// `token` is the verbatim `Authorization` header value, `cookie` a `; `-joined
/// cookie header. Either one being non-empty makes the credential valid; there
/// is no expiry, a rejected request is the only signal.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: Option<String>,
    pub cookie: Option<String>,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            cookie: None,
        }
    }

    pub fn cookies(header: impl Into<String>) -> Self {
        Self {
            token: None,
            cookie: Some(header.into()),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn is_valid(&self) -> bool {
        self.has_token() || self.has_cookie()
    }

    /// Merge the non-empty fields of `partial` into `self`.
    ///
    /// Returns true if anything changed.
    pub fn merge(&mut self, partial: Credential) -> bool {
        let mut changed = false;
        if let Some(token) = partial.token.filter(|t| !t.is_empty()) {
            if self.token.as_deref() != Some(token.as_str()) {
                self.token = Some(token);
                changed = true;
            }
        }
        if let Some(cookie) = partial.cookie.filter(|c| !c.is_empty()) {
            if self.cookie.as_deref() != Some(cookie.as_str()) {
                self.cookie = Some(cookie);
                changed = true;
            }
        }
        changed
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field(
                "cookie",
                &self.cookie.as_ref().map(|c| format!("<{} bytes>", c.len())),
            )
            .finish()
    }
}

/// State change published by the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialEvent {
    /// Store was updated; flags say which fields are now present.
    Captured { token: bool, cookie: bool },
    Cleared,
}

/// Authentication attached to an upstream request.
#[derive(Clone, PartialEq, Eq)]
pub enum RequestAuth {
    Bearer(String),
    Cookie(String),
    Anonymous,
}

impl RequestAuth {
    /// Bearer token wins over cookies; nothing at all sends the request bare.
    pub fn from_credential(credential: &Credential) -> Self {
        if let Some(token) = credential.token.as_ref().filter(|t| !t.is_empty()) {
            RequestAuth::Bearer(token.clone())
        } else if let Some(cookie) = credential.cookie.as_ref().filter(|c| !c.is_empty()) {
            RequestAuth::Cookie(cookie.clone())
        } else {
            RequestAuth::Anonymous
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RequestAuth::Bearer(_) => "bearer",
            RequestAuth::Cookie(_) => "cookie",
            RequestAuth::Anonymous => "anonymous",
        }
    }
}

impl fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestAuth::{}", self.kind())
    }
}

// ============================================================================
// Login surface
// ============================================================================

/// A cookie read from the login surface's jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Join cookies into a `Cookie` header value.
pub fn cookie_header(cookies: &[SessionCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// How the interactive login surface should be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    /// Isolated storage partition; persistent partitions keep sessions across runs.
    pub partition: String,
    pub hidden_until_ready: bool,
    pub width: u32,
    pub height: u32,
}

impl SurfaceOptions {
    pub fn for_partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            hidden_until_ready: true,
            width: 1100,
            height: 800,
        }
    }
}

/// Something observed on the login surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// An outbound request is about to leave with these headers.
    RequestSent {
        url: String,
        headers: Vec<(String, String)>,
    },
    /// A request finished.
    RequestCompleted { url: String, status: u16 },
    /// The user closed the surface.
    Closed,
}

/// URL pattern such as `https://api.example.com/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFilter {
    pattern: String,
}

impl UrlFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Match every path under `origin`.
    pub fn for_origin(origin: &str) -> Self {
        Self::new(format!("{}/*", origin.trim_end_matches('/')))
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, url: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => {
                url.starts_with(prefix) || url == prefix.trim_end_matches('/')
            }
            None => url == self.pattern,
        }
    }
}

/// Lifecycle of the acquisition coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Capturing,
}

// ============================================================================
// Upstream
// ============================================================================

/// Raw answer from the flowsheet API, classified by the fetch use case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl UpstreamResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }
}

/// Normalized point in time sent as the `asOf` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AsOf(DateTime<Utc>);

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

const SPACED_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

impl AsOf {
    /// Normalize caller input against the current clock.
    pub fn normalize(input: Option<&str>) -> Self {
        Self::normalize_at(input, Utc::now())
    }

    /// Normalize caller input, using `now` for absent or unusable input.
    ///
    /// Datetimes (anything with a `T`) are kept as-is, calendar dates become
    /// midnight UTC of that date.
    pub fn normalize_at(input: Option<&str>, now: DateTime<Utc>) -> Self {
        let input = input.map(str::trim).filter(|s| !s.is_empty());
        let instant = input.and_then(parse_input).unwrap_or(now);
        Self::from_datetime(instant)
    }

    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        Self(instant.trunc_subsecs(3))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for AsOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

fn parse_input(input: &str) -> Option<DateTime<Utc>> {
    let parsed = if input.contains('T') {
        parse_datetime(input).or_else(|| parse_calendar_date(input))
    } else {
        parse_calendar_date(input)
    };
    parsed.filter(|dt| (1..=9999).contains(&dt.year()))
}

fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_calendar_date(input: &str) -> Option<DateTime<Utc>> {
    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
        .or_else(|| {
            SPACED_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
                .map(|naive| naive.date())
        })?;
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}
