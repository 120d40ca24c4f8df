//! Process-wide holder of the harvested credential.

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::entities::{Credential, CredentialEvent};

const EVENT_CAPACITY: usize = 64;

/// In-memory credential cache shared by the coordinator and the fetcher.
///
/// Create one per process and hand it out behind an `Arc`. Nothing is
/// persisted; dropping the store forgets the credential.
pub struct CredentialStore {
    credential: RwLock<Credential>,
    events: broadcast::Sender<CredentialEvent>,
}

impl CredentialStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            credential: RwLock::new(Credential::default()),
            events,
        }
    }

    pub async fn get(&self) -> Credential {
        self.credential.read().await.clone()
    }

    pub async fn is_valid(&self) -> bool {
        self.credential.read().await.is_valid()
    }

    /// Merge non-empty fields of `partial`; omitted fields are left alone.
    pub async fn set(&self, partial: Credential) {
        let mut credential = self.credential.write().await;
        if credential.merge(partial) {
            let event = CredentialEvent::Captured {
                token: credential.has_token(),
                cookie: credential.has_cookie(),
            };
            debug!(
                token = credential.has_token(),
                cookie = credential.has_cookie(),
                "credential updated"
            );
            let _ = self.events.send(event);
        }
    }

    pub async fn clear(&self) {
        let mut credential = self.credential.write().await;
        *credential = Credential::default();
        info!("clearing cached authentication");
        let _ = self.events.send(CredentialEvent::Cleared);
    }

    /// Observe every change to the store.
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.events.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
