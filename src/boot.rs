//!
//! vestibule handshake orchestrator
//! ---------------------------------
//! Composes identity, capability and the tiered cache into one merged
//! readiness signal. Two paths race: an optimistic synchronous probe of the
//! durable capability snapshot (unblocks the UI immediately on warm starts)
//! and the authoritative batch of network fetches launched once identity is
//! known. Readiness is a liveness guarantee that something usable exists, not
//! a freshness guarantee; reconciliation continues after READY.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityResolver, CapabilitySnapshot, CAPABILITY_SNAPSHOT_KEY};
use crate::cache::{Tier, TieredCacheStore};
use crate::error::{KernelError, KernelResult};
use crate::identity::{IdentityResolver, ProfileService};

/// Boot lifecycle. Transitions are monotonically forward except the full
/// reset on sign-out, which returns to `ResolvingIdentity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    ResolvingIdentity,
    HydratingKernel,
    Ready,
}

/// The merge rule for the readiness race: READY as soon as either the
/// authoritative batch has settled or a persisted snapshot primed the kernel;
/// HYDRATING_KERNEL while identity is known but neither has happened;
/// RESOLVING_IDENTITY before that.
pub fn merge_readiness(auth_ready: bool, primed: bool, authoritative: bool) -> BootState {
    if authoritative || primed {
        BootState::Ready
    } else if auth_ready {
        BootState::HydratingKernel
    } else {
        BootState::ResolvingIdentity
    }
}

fn nav_counts_key(company_id: &str) -> String {
    format!("nav.counts.{}", company_id)
}

#[derive(Default)]
struct BootFlags {
    primed: bool,
    authoritative: bool,
}

pub struct BootOrchestrator {
    identity: Arc<IdentityResolver>,
    capability: Arc<CapabilityResolver>,
    cache: Arc<TieredCacheStore>,
    profiles: Arc<dyn ProfileService>,
    flags: RwLock<BootFlags>,
    status_tx: watch::Sender<BootState>,
    boot_timeout: Duration,
}

impl BootOrchestrator {
    pub fn new(
        identity: Arc<IdentityResolver>,
        capability: Arc<CapabilityResolver>,
        cache: Arc<TieredCacheStore>,
        profiles: Arc<dyn ProfileService>,
        boot_timeout: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(BootState::ResolvingIdentity);
        Self {
            identity,
            capability,
            cache,
            profiles,
            flags: RwLock::new(BootFlags::default()),
            status_tx,
            boot_timeout,
        }
    }

    /// Synchronously probe durable storage for a still-valid capability
    /// snapshot. A hit adopts the snapshot optimistically and flips
    /// `is_primed` before any network call resolves.
    pub fn prime(&self) -> bool {
        let Some(payload) = self.cache.get(CAPABILITY_SNAPSHOT_KEY) else {
            return false;
        };
        let snapshot: CapabilitySnapshot = match serde_json::from_value(payload) {
            Ok(s) => s,
            Err(e) => {
                debug!(target: "vestibule::boot", "unusable capability snapshot ignored: {}", e);
                return false;
            }
        };
        self.capability.adopt_snapshot(&snapshot);
        self.flags.write().primed = true;
        info!(target: "vestibule::boot", "primed from snapshot: role={}", snapshot.role.as_str());
        self.publish();
        true
    }

    pub fn is_primed(&self) -> bool {
        self.flags.read().primed
    }

    /// Current merged readiness.
    pub fn status(&self) -> BootState {
        let flags = self.flags.read();
        merge_readiness(self.identity.auth_ready(), flags.primed, flags.authoritative)
    }

    pub fn subscribe(&self) -> watch::Receiver<BootState> {
        self.status_tx.subscribe()
    }

    fn publish(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    /// Launch the authoritative batch once identity is known. Member fetches
    /// run concurrently with no defined completion order; a failed member is
    /// caught and logged, leaving the state at HYDRATING_KERNEL for the
    /// caller-imposed timeout to bound.
    pub async fn run_handshake(&self) {
        self.publish();
        if !self.identity.auth_ready() {
            debug!(target: "vestibule::boot", "handshake deferred: identity not settled");
            return;
        }
        let Some(session) = self.identity.identity() else {
            // Definitive absence: nothing to hydrate, readiness is settled.
            self.flags.write().authoritative = true;
            self.publish();
            return;
        };

        let subject_id = session.subject_id.clone();
        let known_company = self.capability.company_id();
        let was_cold = known_company.is_none();
        let batch = async {
            match known_company {
                Some(company_id) => {
                    // Company already known (snapshot or earlier refresh):
                    // overlap the capability lookup with the counts prefetch.
                    let (refreshed, _) = tokio::join!(
                        self.capability.refresh_role_checked(&subject_id),
                        self.prefetch_counts(company_id),
                    );
                    refreshed
                }
                // Cold start: the company id only becomes known through the
                // profile itself, so only the capability lookup gates here.
                None => self.capability.refresh_role_checked(&subject_id).await,
            }
        };

        match tokio::time::timeout(self.boot_timeout, batch).await {
            Ok((role, settled)) => {
                if settled {
                    self.flags.write().authoritative = true;
                    info!(target: "vestibule::boot", "authoritative batch settled: role={}", role.as_str());
                } else {
                    warn!(target: "vestibule::boot", "authoritative batch did not settle; staying in hydration");
                }
            }
            Err(_) => {
                warn!(
                    target: "vestibule::boot",
                    "authoritative batch exceeded {}ms; staying in hydration",
                    self.boot_timeout.as_millis()
                );
            }
        }
        self.publish();

        if was_cold {
            // Counts follow as background reconciliation once the profile
            // revealed the company; readiness is already settled above.
            if let Some(company_id) = self.capability.company_id() {
                self.prefetch_counts(company_id).await;
            }
        }
    }

    async fn prefetch_counts(&self, company_id: String) {
        let loader = self.profiles.summary_counts(&company_id);
        let result: anyhow::Result<JsonValue> = self
            .cache
            .fetch(&nav_counts_key(&company_id), Tier::Layout, loader)
            .await;
        if let Err(e) = result {
            warn!(target: "vestibule::boot", "summary counts prefetch failed: {}", e);
        }
    }

    /// Await READY within the configured boot timeout. On expiry the caller
    /// must treat the capability as unknown rather than hang; the returned
    /// error carries the single generic retry affordance.
    pub async fn wait_ready(&self) -> KernelResult<()> {
        let mut rx = self.subscribe();
        let awaited = tokio::time::timeout(self.boot_timeout, async {
            loop {
                if *rx.borrow() == BootState::Ready {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        match awaited {
            Ok(()) if self.status() == BootState::Ready => Ok(()),
            _ => Err(KernelError::boot_timeout(
                "boot_timeout",
                "handshake did not reach READY within the imposed timeout",
            )),
        }
    }

    /// Full reset on sign-out: both flags drop and the published status
    /// returns to RESOLVING_IDENTITY (the identity resolver is reset by the
    /// kernel before this is called).
    pub fn reset(&self) {
        {
            let mut flags = self.flags.write();
            flags.primed = false;
            flags.authoritative = false;
        }
        self.publish();
    }
}
