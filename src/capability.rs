//! Capability (role) normalization and the resolver that keeps the single
//! authoritative role value for the session. Raw role strings arrive from two
//! independently nullable, case-varying profile fields; everything downstream
//! sees only the normalized enum.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::cache::{Tier, TieredCacheStore};
use crate::identity::{Profile, ProfileService};

/// Durable key for the capability snapshot the boot orchestrator primes from.
pub const CAPABILITY_SNAPSHOT_KEY: &str = "capability.snapshot";

fn profile_summary_key(subject_id: &str) -> String {
    format!("profile.summary.{}", subject_id)
}

/// Normalized role controlling route and feature access. `Unknown` is the
/// fail-closed absence of a valid role, never a permissive default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Buyer,
    Seller,
    Hybrid,
    Logistics,
    Unknown,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Buyer => "buyer",
            Capability::Seller => "seller",
            Capability::Hybrid => "hybrid",
            Capability::Logistics => "logistics",
            Capability::Unknown => "unknown",
        }
    }
}

fn match_role(raw: &str) -> Option<Capability> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "buyer" => Some(Capability::Buyer),
        "seller" => Some(Capability::Seller),
        "hybrid" => Some(Capability::Hybrid),
        "logistics" | "logistics_partner" => Some(Capability::Logistics),
        _ => None,
    }
}

/// Normalize the two raw role fields into one capability. Precedence:
/// `raw_role` first, then `raw_user_role`, otherwise `Unknown`. Pure function
/// of its inputs; equal raw fields always yield the same capability.
pub fn normalize_role(raw_role: Option<&str>, raw_user_role: Option<&str>) -> Capability {
    raw_role
        .and_then(match_role)
        .or_else(|| raw_user_role.and_then(match_role))
        .unwrap_or(Capability::Unknown)
}

/// Point-in-time snapshot persisted for optimistic priming on the next boot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub subject_id: String,
    pub role: Capability,
    #[serde(default)]
    pub company_id: Option<String>,
}

struct CapabilityState {
    role: Capability,
    company_id: Option<String>,
    /// Generation of the last committed refresh; 0 means only primed data.
    committed_generation: u64,
}

/// Loads the profile record for an identity and maintains the normalized
/// capability. Every refresh is generation-tagged at start so an invocation
/// that started later always wins over one that merely finished later.
pub struct CapabilityResolver {
    profiles: Arc<dyn ProfileService>,
    cache: Arc<TieredCacheStore>,
    state: RwLock<CapabilityState>,
    generation: AtomicU64,
}

impl CapabilityResolver {
    pub fn new(profiles: Arc<dyn ProfileService>, cache: Arc<TieredCacheStore>) -> Self {
        Self {
            profiles,
            cache,
            state: RwLock::new(CapabilityState { role: Capability::Unknown, company_id: None, committed_generation: 0 }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn role(&self) -> Capability {
        self.state.read().role
    }

    pub fn company_id(&self) -> Option<String> {
        self.state.read().company_id.clone()
    }

    // Convenience booleans: equality against the one normalized value, no
    // independent derivation path.
    pub fn is_buyer(&self) -> bool { self.role() == Capability::Buyer }
    pub fn is_seller(&self) -> bool { self.role() == Capability::Seller }
    pub fn is_hybrid(&self) -> bool { self.role() == Capability::Hybrid }
    pub fn is_logistics(&self) -> bool { self.role() == Capability::Logistics }

    /// Authoritative refresh: load the profile, normalize, commit if no newer
    /// invocation has committed meanwhile, and persist the snapshot for the
    /// next boot. Lookup failures normalize to `Unknown` and are logged,
    /// never thrown to the caller.
    pub async fn refresh_role(&self, subject_id: &str) -> Capability {
        self.refresh_role_checked(subject_id).await.0
    }

    /// As `refresh_role`, but also reports whether the lookup settled
    /// (a definitive answer, including "no profile") versus errored. The boot
    /// orchestrator only counts settled lookups as authoritative.
    pub(crate) async fn refresh_role_checked(&self, subject_id: &str) -> (Capability, bool) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (role, company_id, keep_company, settled) = match self.load_profile(subject_id).await {
            Ok(Some(profile)) => {
                let role = normalize_role(profile.raw_role.as_deref(), profile.raw_user_role.as_deref());
                (role, profile.company_id.clone(), false, true)
            }
            Ok(None) => {
                debug!(target: "vestibule::capability", "no profile for subject={}", subject_id);
                (Capability::Unknown, None, false, true)
            }
            Err(e) => {
                warn!(target: "vestibule::capability", "profile lookup failed, normalizing to unknown: {}", e);
                (Capability::Unknown, None, true, false)
            }
        };
        (self.commit(generation, subject_id, role, company_id, keep_company), settled)
    }

    /// Adopt a persisted snapshot as the optimistic value. Only applies while
    /// no authoritative refresh has committed; a snapshot can never downgrade
    /// a fresher network result.
    pub fn adopt_snapshot(&self, snapshot: &CapabilitySnapshot) {
        let mut st = self.state.write();
        if st.committed_generation == 0 {
            st.role = snapshot.role;
            st.company_id = snapshot.company_id.clone();
        }
    }

    /// Sign-out teardown: back to the fail-closed default.
    pub fn reset(&self) {
        let mut st = self.state.write();
        st.role = Capability::Unknown;
        st.company_id = None;
        st.committed_generation = 0;
    }

    async fn load_profile(&self, subject_id: &str) -> anyhow::Result<Option<Profile>> {
        // Explicit refresh always hits the service; the cache is written
        // through afterwards so warm readers see the freshest summary.
        let profile = self.profiles.lookup(subject_id).await?;
        let payload: JsonValue = serde_json::to_value(&profile)?;
        self.cache.put(profile_summary_key(subject_id), Tier::Metadata, payload);
        Ok(profile)
    }

    fn commit(
        &self,
        generation: u64,
        subject_id: &str,
        role: Capability,
        company_id: Option<String>,
        keep_company: bool,
    ) -> Capability {
        let (committed, company_for_snapshot) = {
            let mut st = self.state.write();
            if generation >= st.committed_generation {
                st.committed_generation = generation;
                st.role = role;
                if !keep_company {
                    st.company_id = company_id;
                }
                (true, st.company_id.clone())
            } else {
                debug!(
                    target: "vestibule::capability",
                    "stale refresh discarded: generation={} < committed={}",
                    generation, st.committed_generation
                );
                (false, None)
            }
        };
        if committed && role != Capability::Unknown {
            let snapshot = CapabilitySnapshot {
                subject_id: subject_id.to_string(),
                role,
                company_id: company_for_snapshot,
            };
            if let Ok(payload) = serde_json::to_value(&snapshot) {
                self.cache.put(CAPABILITY_SNAPSHOT_KEY, Tier::Metadata, payload);
            }
        }
        self.role()
    }
}
