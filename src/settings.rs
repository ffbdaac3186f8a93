//! Kernel configuration loaded from an optional `kernel.json` beside the
//! durable store. Missing or unreadable files fall back to defaults so a
//! misconfigured host never blocks boot.

use std::path::Path;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct KernelSettings {
    /// Namespace prefix for the durable blob; lets multiple apps share one origin.
    #[serde(default = "KernelSettings::default_namespace")]
    pub namespace: String,
    /// Maximum age of a persisted entry before a read treats it as absent.
    #[serde(default = "KernelSettings::default_max_entry_age_ms")]
    pub max_entry_age_ms: i64,
    /// Upper bound on HYDRATING_KERNEL before consumers fall back to an unknown role.
    #[serde(default = "KernelSettings::default_boot_timeout_ms")]
    pub boot_timeout_ms: u64,
    /// Optional persistence tuning loaded from the same file.
    #[serde(default)]
    pub persistence: PersistenceSettings,
}

impl KernelSettings {
    fn default_namespace() -> String { "vestibule".to_string() }
    fn default_max_entry_age_ms() -> i64 { 24 * 60 * 60 * 1000 }
    fn default_boot_timeout_ms() -> u64 { 8_000 }

    /// Load settings from `<dir>/kernel.json`, falling back to defaults on any
    /// missing or malformed file.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join("kernel.json");
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(s) = serde_json::from_slice::<KernelSettings>(&bytes) { return s; }
        }
        Self::default()
    }
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            namespace: Self::default_namespace(),
            max_entry_age_ms: Self::default_max_entry_age_ms(),
            boot_timeout_ms: Self::default_boot_timeout_ms(),
            persistence: PersistenceSettings::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PersistenceSettings {
    /// Disable durable writes entirely (memory-only operation).
    #[serde(default = "PersistenceSettings::default_enabled")]
    pub enabled: bool,
}

impl PersistenceSettings {
    fn default_enabled() -> bool { true }
}

impl Default for PersistenceSettings {
    fn default() -> Self { Self { enabled: Self::default_enabled() } }
}
