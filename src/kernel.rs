//!
//! vestibule kernel
//! -----------------
//! The explicitly owned state container composing identity resolution,
//! capability normalization, the tiered cache and the handshake orchestrator.
//! Constructed once at provider mount with injected collaborators and torn
//! down on sign-out; application code depends only on the consumer surface
//! exposed here, never on internal fetch mechanics.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::boot::{BootOrchestrator, BootState};
use crate::cache::{DurableBlob, PersistencePolicy, TieredCacheStore};
use crate::capability::{Capability, CapabilityResolver};
use crate::error::KernelResult;
use crate::identity::{AuthEvent, IdentityProvider, IdentityResolver, ProfileService, Session};
use crate::settings::KernelSettings;

pub struct Kernel {
    /// Instance id correlating this kernel's log lines across its lifetime.
    instance_id: uuid::Uuid,
    provider: Arc<dyn IdentityProvider>,
    identity: Arc<IdentityResolver>,
    capability: Arc<CapabilityResolver>,
    cache: Arc<TieredCacheStore>,
    boot: Arc<BootOrchestrator>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Kernel {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileService>,
        durable: Arc<dyn DurableBlob>,
        settings: KernelSettings,
    ) -> Arc<Self> {
        let cache = Arc::new(TieredCacheStore::new(
            durable,
            PersistencePolicy::default(),
            settings.max_entry_age_ms,
            settings.persistence.enabled,
        ));
        let identity = Arc::new(IdentityResolver::new(provider.clone()));
        let capability = Arc::new(CapabilityResolver::new(profiles.clone(), cache.clone()));
        let boot = Arc::new(BootOrchestrator::new(
            identity.clone(),
            capability.clone(),
            cache.clone(),
            profiles,
            Duration::from_millis(settings.boot_timeout_ms),
        ));
        Arc::new(Self {
            instance_id: uuid::Uuid::new_v4(),
            provider,
            identity,
            capability,
            cache,
            boot,
            pump: Mutex::new(None),
        })
    }

    /// Bring the kernel up: synchronous snapshot prime first (unblocks warm
    /// starts before any network call), then the event pump and the
    /// resolve-identity/handshake sequence in the background.
    pub fn start(self: &Arc<Self>) {
        info!(target: "vestibule::kernel", "kernel {} starting", self.instance_id);
        self.boot.prime();
        self.spawn_event_pump();
        let kernel = self.clone();
        tokio::spawn(async move {
            kernel.identity.resolve().await;
            kernel.boot.run_handshake().await;
        });
    }

    // --- consumer surface -------------------------------------------------

    pub fn auth_ready(&self) -> bool {
        self.identity.auth_ready()
    }

    pub fn identity(&self) -> Option<Session> {
        self.identity.identity()
    }

    pub fn role(&self) -> Capability {
        self.capability.role()
    }

    pub fn is_buyer(&self) -> bool { self.capability.is_buyer() }
    pub fn is_seller(&self) -> bool { self.capability.is_seller() }
    pub fn is_hybrid(&self) -> bool { self.capability.is_hybrid() }
    pub fn is_logistics(&self) -> bool { self.capability.is_logistics() }

    pub fn handshake_status(&self) -> BootState {
        self.boot.status()
    }

    pub fn is_system_ready(&self) -> bool {
        self.boot.status() == BootState::Ready
    }

    pub fn is_primed(&self) -> bool {
        self.boot.is_primed()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<BootState> {
        self.boot.subscribe()
    }

    /// Explicit role refresh for the signed-in identity. Without one the role
    /// stays at the fail-closed default.
    pub async fn refresh_role(&self) -> Capability {
        match self.identity.identity() {
            Some(session) => self.capability.refresh_role(&session.subject_id).await,
            None => Capability::Unknown,
        }
    }

    /// Await READY within the configured boot timeout.
    pub async fn wait_ready(&self) -> KernelResult<()> {
        self.boot.wait_ready().await
    }

    /// The single retry affordance surfaced when boot misses its timeout:
    /// re-run the definitive identity check and the handshake.
    pub async fn retry_handshake(&self) {
        self.identity.resolve().await;
        self.boot.run_handshake().await;
    }

    /// Explicit sign-out teardown: clears all durable entries, resets every
    /// resolver and returns the boot state to RESOLVING_IDENTITY, then
    /// re-resolves so the definitive absence settles.
    pub async fn sign_out(&self) {
        self.teardown();
        self.identity.resolve().await;
        self.boot.run_handshake().await;
    }

    pub fn cache(&self) -> &Arc<TieredCacheStore> {
        &self.cache
    }

    // --- lifecycle internals ----------------------------------------------

    fn teardown(&self) {
        info!(target: "vestibule::kernel", "kernel {} teardown: purging durable entries and resetting state", self.instance_id);
        self.capability.reset();
        self.cache.purge_all();
        self.identity.reset();
        self.boot.reset();
    }

    fn spawn_event_pump(self: &Arc<Self>) {
        let mut rx = self.provider.subscribe();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                let ev = match rx.recv().await {
                    Ok(ev) => ev,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(target: "vestibule::kernel", "event pump lagged, skipped {}", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(kernel) = weak.upgrade() else { break };
                match &ev {
                    AuthEvent::SignedIn(session) => {
                        debug!(target: "vestibule::kernel", "signed in: subject={}", session.subject_id);
                        kernel.identity.apply_event(&ev);
                        kernel.boot.run_handshake().await;
                    }
                    AuthEvent::SignedOut => {
                        kernel.identity.apply_event(&ev);
                        kernel.teardown();
                        kernel.identity.resolve().await;
                        kernel.boot.run_handshake().await;
                    }
                    AuthEvent::TokenRefreshed(_) => {
                        // Expiry update only; never resets auth_ready.
                        kernel.identity.apply_event(&ev);
                    }
                }
            }
        });
        *self.pump.lock() = Some(handle);
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}
