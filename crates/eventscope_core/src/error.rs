use thiserror::Error;

/// Maximum number of characters of an upstream body carried in an error.
pub const BODY_SNIPPET_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("login was closed before authentication")]
    AbandonedLogin,

    #[error("authentication failed after {attempts} attempts (last status {status})")]
    Authentication { status: u16, attempts: u32 },

    #[error("upstream request failed ({status}, attempt {attempt}): {snippet}")]
    Upstream {
        status: u16,
        attempt: u32,
        snippet: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("login surface error: {0}")]
    Surface(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an upstream error for the 1-based `attempt`, truncating the body
    /// for diagnostics.
    pub fn upstream(status: u16, attempt: u32, body: &str) -> Self {
        Error::Upstream {
            status,
            attempt,
            snippet: snippet(body),
        }
    }
}

/// Truncate `body` to [`BODY_SNIPPET_LIMIT`] characters.
pub fn snippet(body: &str) -> String {
    match body.char_indices().nth(BODY_SNIPPET_LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
