//! Terminal stand-in for an interactive login window.
//!
//! The user signs in with their own browser and pastes either the
//! `Authorization` header or the cookie header of a request to the API. Each
//! paste is replayed to the interceptor as the network event a real login
//! window would have produced.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use dialoguer::Input;
use eventscope_core::config::UpstreamSettings;
use eventscope_core::entities::{SessionCookie, SurfaceEvent, SurfaceOptions, UrlFilter};
use eventscope_core::ports::{LoginSurface, SurfaceProvider};
use eventscope_core::Error;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Source of user input lines.
pub trait LinePrompt: Send + Sync + 'static {
    /// Next line typed by the user, `None` at end of input.
    fn read_line(&self, prompt: &str) -> Option<String>;

    fn show(&self, message: &str);
}

/// Interactive prompt on the controlling terminal. Messages go to stderr by
/// default so stdout stays clean for command output; dialoguer prompts on
/// stderr as well.
pub struct TerminalPrompt<W = io::Stderr> {
    out: Mutex<W>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::with_output(io::stderr())
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send + 'static> TerminalPrompt<W> {
    pub fn with_output(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send + 'static> LinePrompt for TerminalPrompt<W> {
    fn read_line(&self, prompt: &str) -> Option<String> {
        Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .ok()
    }

    fn show(&self, message: &str) {
        if let Ok(mut out) = self.out.lock() {
            if let Err(e) = writeln!(out, "{}", message).and_then(|_| out.flush()) {
                warn!(error = %e, "failed to write login instructions");
            }
        }
    }
}

/// What a pasted line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pasted {
    Token(String),
    Cookies(Vec<SessionCookie>),
    Cancel,
    Unrecognized,
}

fn header_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?<name>authorization|cookie)\s*:\s*(?<value>.+)$")
            .expect("invalid regex")
    })
}

fn bare_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(bearer|basic)\s+\S+").expect("invalid regex"))
}

/// Classify one line pasted by the user.
pub fn parse_pasted(line: &str) -> Pasted {
    let line = line.trim();
    if line.is_empty() {
        return Pasted::Cancel;
    }

    if let Some(captures) = header_line_regex().captures(line) {
        let value = captures["value"].trim().to_string();
        return if captures["name"].eq_ignore_ascii_case("authorization") {
            Pasted::Token(value)
        } else {
            cookies_or_unrecognized(&value)
        };
    }

    if bare_token_regex().is_match(line) {
        return Pasted::Token(line.to_string());
    }

    cookies_or_unrecognized(line)
}

fn cookies_or_unrecognized(value: &str) -> Pasted {
    let cookies = parse_cookie_pairs(value);
    if cookies.is_empty() {
        Pasted::Unrecognized
    } else {
        Pasted::Cookies(cookies)
    }
}

/// Split a `name=value; name2=value2` header into cookies.
pub fn parse_cookie_pairs(header: &str) -> Vec<SessionCookie> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return None;
            }
            Some(SessionCookie::new(name, value.trim()))
        })
        .collect()
}

type Jar = Vec<(String, SessionCookie)>;

/// Opens console login surfaces. Cookie jars live per partition for the
/// lifetime of the provider.
pub struct ConsoleSurfaceProvider {
    prompt: Arc<dyn LinePrompt>,
    api_url: String,
    api_origin: String,
    jars: Arc<Mutex<HashMap<String, Jar>>>,
}

impl ConsoleSurfaceProvider {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, Error> {
        Self::with_prompt(settings, Arc::new(TerminalPrompt::new()))
    }

    pub fn with_prompt(
        settings: &UpstreamSettings,
        prompt: Arc<dyn LinePrompt>,
    ) -> Result<Self, Error> {
        Ok(Self {
            prompt,
            api_url: settings.api_url.clone(),
            api_origin: settings.api_origin()?,
            jars: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl SurfaceProvider for ConsoleSurfaceProvider {
    type Surface = ConsoleSurface;

    #[instrument(skip(self))]
    async fn open(&self, options: &SurfaceOptions) -> Result<ConsoleSurface, Error> {
        debug!(partition = %options.partition, "opening console login surface");
        Ok(ConsoleSurface {
            prompt: self.prompt.clone(),
            api_url: self.api_url.clone(),
            api_origin: self.api_origin.clone(),
            partition: options.partition.clone(),
            jars: self.jars.clone(),
            sender: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn clear_storage(&self, partition: &str) -> Result<(), Error> {
        let mut jars = self
            .jars
            .lock()
            .map_err(|_| Error::Surface("cookie jar poisoned".to_string()))?;
        jars.remove(partition);
        debug!(partition, "cleared login storage");
        Ok(())
    }
}

pub struct ConsoleSurface {
    prompt: Arc<dyn LinePrompt>,
    api_url: String,
    api_origin: String,
    partition: String,
    jars: Arc<Mutex<HashMap<String, Jar>>>,
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<SurfaceEvent>>>>,
    closed: Arc<AtomicBool>,
}

impl ConsoleSurface {
    fn store_cookies(
        jars: &Mutex<HashMap<String, Jar>>,
        partition: &str,
        origin: &str,
        cookies: Vec<SessionCookie>,
    ) {
        let Ok(mut jars) = jars.lock() else {
            warn!("cookie jar poisoned, dropping pasted cookies");
            return;
        };
        let jar = jars.entry(partition.to_string()).or_default();
        for cookie in cookies {
            jar.retain(|(o, c)| !(o == origin && c.name == cookie.name));
            jar.push((origin.to_string(), cookie));
        }
    }

    fn emit(
        sender: &Mutex<Option<mpsc::UnboundedSender<SurfaceEvent>>>,
        event: SurfaceEvent,
    ) -> bool {
        match sender.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|tx| tx.send(event).is_ok()),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl LoginSurface for ConsoleSurface {
    fn intercept(
        &self,
        filter: &UrlFilter,
    ) -> Result<mpsc::UnboundedReceiver<SurfaceEvent>, Error> {
        let mut sender = self
            .sender
            .lock()
            .map_err(|_| Error::Surface("interceptor state poisoned".to_string()))?;
        if sender.is_some() {
            return Err(Error::Surface("interceptor already registered".to_string()));
        }
        if !filter.matches(&self.api_url) {
            warn!(filter = filter.pattern(), "interceptor filter does not cover the API URL");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *sender = Some(tx);
        Ok(rx)
    }

    fn release_interceptor(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }

    async fn navigate(&self, url: &str) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Surface("login surface already closed".to_string()));
        }

        self.prompt.show(&format!(
            "Sign in at {} in your browser.\n\
             Then paste the Authorization header or the Cookie header of any request to {}.\n\
             Leave the line empty to cancel.",
            url, self.api_origin
        ));

        let prompt = self.prompt.clone();
        let api_url = self.api_url.clone();
        let api_origin = self.api_origin.clone();
        let partition = self.partition.clone();
        let jars = self.jars.clone();
        let sender = self.sender.clone();
        let closed = self.closed.clone();

        // Reads until something usable or a cancel arrives, so no reader outlives the login.
        tokio::task::spawn_blocking(move || loop {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            let line = prompt.read_line("Header");
            match line.as_deref().map(parse_pasted).unwrap_or(Pasted::Cancel) {
                Pasted::Token(token) => {
                    info!("authorization header pasted");
                    Self::emit(
                        &sender,
                        SurfaceEvent::RequestSent {
                            url: api_url.clone(),
                            headers: vec![("Authorization".to_string(), token)],
                        },
                    );
                    return;
                }
                Pasted::Cookies(cookies) => {
                    info!(count = cookies.len(), "cookies pasted");
                    Self::store_cookies(&jars, &partition, &api_origin, cookies);
                    Self::emit(
                        &sender,
                        SurfaceEvent::RequestCompleted {
                            url: api_url.clone(),
                            status: 200,
                        },
                    );
                    return;
                }
                Pasted::Cancel => {
                    closed.store(true, Ordering::SeqCst);
                    Self::emit(&sender, SurfaceEvent::Closed);
                    return;
                }
                Pasted::Unrecognized => {
                    prompt.show("That does not look like an Authorization or Cookie header.");
                }
            }
        });

        Ok(())
    }

    async fn cookies(&self, url: &str) -> Result<Vec<SessionCookie>, Error> {
        let jars = self
            .jars
            .lock()
            .map_err(|_| Error::Surface("cookie jar poisoned".to_string()))?;
        Ok(jars
            .get(&self.partition)
            .map(|jar| {
                jar.iter()
                    .filter(|(origin, _)| url.starts_with(origin.as_str()))
                    .map(|(_, cookie)| cookie.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("console login surface closed");
        }
        self.release_interceptor();
    }
}
