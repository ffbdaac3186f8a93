use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Sensitivity classification of a cached item. Governs whether a value may
/// ever be written to durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// L1: structural identifiers (catalogs, reference data).
    Structural,
    /// L2: layout and navigation shell data.
    Layout,
    /// L3: capability snapshot and profile metadata.
    Metadata,
    /// L4: atomic per-transaction and financial state. Never durable.
    Atomic,
}

impl Tier {
    pub fn as_u8(self) -> u8 {
        match self {
            Tier::Structural => 1,
            Tier::Layout => 2,
            Tier::Metadata => 3,
            Tier::Atomic => 4,
        }
    }

    pub fn from_u8(v: u8) -> Option<Tier> {
        match v {
            1 => Some(Tier::Structural),
            2 => Some(Tier::Layout),
            3 => Some(Tier::Metadata),
            4 => Some(Tier::Atomic),
            _ => None,
        }
    }
}

/// Per-key persistence decision: a key is persisted only when it matches the
/// explicit allow-list AND misses the sensitive denylist. The denylist wins
/// over the allow-list, so allow-list overlap can never leak a sensitive key.
#[derive(Debug, Clone)]
pub struct PersistencePolicy {
    allow_prefixes: Vec<String>,
    deny_substrings: Vec<String>,
}

impl PersistencePolicy {
    pub fn new(allow_prefixes: Vec<String>, deny_substrings: Vec<String>) -> Self {
        Self { allow_prefixes, deny_substrings }
    }

    pub fn should_persist(&self, key: &str) -> bool {
        !self.denied(key) && self.allowed(key)
    }

    pub fn allowed(&self, key: &str) -> bool {
        self.allow_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    pub fn denied(&self, key: &str) -> bool {
        self.deny_substrings.iter().any(|d| key.contains(d.as_str()))
    }
}

static DEFAULT_ALLOW_PREFIXES: Lazy<Vec<String>> = Lazy::new(|| {
    vec![
        "profile.summary".into(),
        "capability.snapshot".into(),
        "nav.counts".into(),
        "settings.workspace".into(),
    ]
});

static DEFAULT_DENY_SUBSTRINGS: Lazy<Vec<String>> = Lazy::new(|| {
    vec![
        // financial detail and atomic per-transaction state
        "payout".into(),
        "payment".into(),
        "invoice".into(),
        "txn".into(),
        "order.detail".into(),
        // PII beyond the structural summaries
        "email".into(),
        "phone".into(),
        "bank".into(),
    ]
});

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self {
            allow_prefixes: DEFAULT_ALLOW_PREFIXES.clone(),
            deny_substrings: DEFAULT_DENY_SUBSTRINGS.clone(),
        }
    }
}
