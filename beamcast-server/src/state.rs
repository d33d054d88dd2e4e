//! Shared application state.
//!
//! One `Arc<AppState>` is threaded through both listeners. The pairing
//! map and the OTP registration share a single coarse lock: pairing is
//! rare and the handshake's step-dependencies make one lock both simpler
//! and more correct than fine-grained locking. The client store has its
//! own lock because the TLS verifier reads it on every handshake.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex, RwLock};

use beamcast_core::pairing::PairingSession;

use crate::certs::ServerIdentity;
use crate::clients::{ClientStore, NamedCertificate};
use crate::config::Config;
use crate::streaming::{
    LocalProcessHost, ProcessHost, StaticVideo, StreamHub, VideoSubsystem,
};
use crate::xml::XmlDoc;

/// A pairing handshake in flight, keyed by the client's `uniqueid`.
pub struct PendingPair {
    pub session: PairingSession,
    /// Fulfilled by the PIN entry channel when the initial request was
    /// suspended awaiting operator input.
    pub responder: Option<oneshot::Sender<XmlDoc>>,
    pub created: Instant,
}

/// The single registered one-time PIN, if any.
pub struct OtpState {
    pub pin: String,
    pub passphrase: String,
    pub device_name: String,
    pub created: Instant,
}

impl OtpState {
    pub fn expired(&self, ttl: Duration) -> bool {
        self.created.elapsed() > ttl
    }
}

/// Pairing map and OTP registration, guarded together.
#[derive(Default)]
pub struct PairingState {
    pub sessions: HashMap<String, PendingPair>,
    pub otp: Option<OtpState>,
}

impl PairingState {
    /// Drop handshakes that never completed. Their suspended responders
    /// are dropped with them, waking the parked requests.
    pub fn prune_expired(&mut self, ttl: Duration) {
        self.sessions.retain(|_, pending| pending.created.elapsed() <= ttl);
    }
}

pub struct AppState {
    pub config: Config,
    pub identity: ServerIdentity,
    pub clients: RwLock<ClientStore>,
    pub pairing: Mutex<PairingState>,
    pub hub: StreamHub,
    pub proc: Arc<dyn ProcessHost>,
    pub video: Arc<dyn VideoSubsystem>,
}

impl AppState {
    pub fn new(config: Config, identity: ServerIdentity) -> Arc<Self> {
        let clients = if config.fresh_state {
            ClientStore::new()
        } else {
            ClientStore::load(&config.state_file)
        };

        let proc = Arc::new(LocalProcessHost::from_config(&config));
        let video = Arc::new(StaticVideo::from_config(&config));
        Self::with_subsystems(config, identity, clients, proc, video)
    }

    pub fn with_subsystems(
        config: Config,
        identity: ServerIdentity,
        clients: ClientStore,
        proc: Arc<dyn ProcessHost>,
        video: Arc<dyn VideoSubsystem>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            identity,
            clients: RwLock::new(clients),
            pairing: Mutex::new(PairingState::default()),
            hub: StreamHub::new(),
            proc,
            video,
        })
    }

    /// Match a presented peer certificate against the authorized store.
    pub async fn verify_peer(&self, der: &[u8]) -> Option<Arc<NamedCertificate>> {
        self.clients.read().await.find_by_der(der)
    }

    /// Append a newly paired client and persist.
    ///
    /// The save-then-reload keeps the in-memory store identical to the
    /// normalized projection on disk, so the verifier and any later saves
    /// see the deduplicated, renamed entries.
    pub async fn add_authorized_client(&self, cert: NamedCertificate) {
        let mut store = self.clients.write().await;
        store.add(cert);

        if !self.config.fresh_state {
            if let Err(e) = store.save(&self.config.state_file) {
                tracing::error!(
                    path = %self.config.state_file.display(),
                    error = %e,
                    "couldn't write client store"
                );
            }
            *store = ClientStore::load(&self.config.state_file);
        }
    }

    pub async fn erase_all_clients(&self) {
        let mut store = self.clients.write().await;
        store.clear();

        if let Err(e) = store.save(&self.config.state_file) {
            tracing::error!(
                path = %self.config.state_file.display(),
                error = %e,
                "couldn't write client store"
            );
        }
        *store = ClientStore::load(&self.config.state_file);
    }

    /// Remove a client by UUID, returning how many entries went away.
    pub async fn unpair_client(&self, uuid: &str) -> usize {
        let mut store = self.clients.write().await;
        let removed = store.remove_by_uuid(uuid);

        if let Err(e) = store.save(&self.config.state_file) {
            tracing::error!(
                path = %self.config.state_file.display(),
                error = %e,
                "couldn't write client store"
            );
        }
        *store = ClientStore::load(&self.config.state_file);
        removed
    }
}
