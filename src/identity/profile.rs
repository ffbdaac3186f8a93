use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Profile record keyed by identity. Raw role fields arrive independently
/// nullable and case-varying from the backend; normalization happens in the
/// capability layer, never here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub subject_id: String,
    #[serde(default)]
    pub raw_role: Option<String>,
    #[serde(default)]
    pub raw_user_role: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
}

/// Narrow seam over the profile/company data service: a point lookup by
/// identity plus the navigation summary counts the boot batch prefetches.
pub trait ProfileService: Send + Sync {
    fn lookup(&self, subject_id: &str) -> BoxFuture<'static, Result<Option<Profile>>>;
    fn summary_counts(&self, company_id: &str) -> BoxFuture<'static, Result<JsonValue>>;
}

struct ServiceState {
    profiles: HashMap<String, Profile>,
    counts: HashMap<String, JsonValue>,
    failing: bool,
}

/// In-process profile service for the dev harness and tests.
pub struct MemoryProfileService {
    state: Arc<RwLock<ServiceState>>,
    latency: Option<Duration>,
}

impl MemoryProfileService {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ServiceState { profiles: HashMap::new(), counts: HashMap::new(), failing: false })),
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.state.write().profiles.insert(profile.subject_id.clone(), profile);
    }

    pub fn insert_counts(&self, company_id: impl Into<String>, counts: JsonValue) {
        self.state.write().counts.insert(company_id.into(), counts);
    }

    /// Make every lookup fail until cleared; used to exercise the
    /// normalize-to-unknown failure path.
    pub fn set_failing(&self, failing: bool) {
        self.state.write().failing = failing;
    }
}

impl Default for MemoryProfileService {
    fn default() -> Self { Self::new() }
}

impl ProfileService for MemoryProfileService {
    fn lookup(&self, subject_id: &str) -> BoxFuture<'static, Result<Option<Profile>>> {
        let state = self.state.clone();
        let latency = self.latency;
        let subject_id = subject_id.to_string();
        Box::pin(async move {
            if let Some(d) = latency {
                tokio::time::sleep(d).await;
            }
            let st = state.read();
            if st.failing {
                return Err(anyhow!("profile query failed"));
            }
            Ok(st.profiles.get(&subject_id).cloned())
        })
    }

    fn summary_counts(&self, company_id: &str) -> BoxFuture<'static, Result<JsonValue>> {
        let state = self.state.clone();
        let latency = self.latency;
        let company_id = company_id.to_string();
        Box::pin(async move {
            if let Some(d) = latency {
                tokio::time::sleep(d).await;
            }
            let st = state.read();
            if st.failing {
                return Err(anyhow!("summary counts query failed"));
            }
            Ok(st.counts.get(&company_id).cloned().unwrap_or_else(|| serde_json::json!({})))
        })
    }
}
