use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::policy::{PersistencePolicy, Tier};

/// Errors at the durable storage boundary. Never fatal: the store degrades to
/// memory-only operation when these occur.
#[derive(Debug, thiserror::Error)]
pub enum DurableBlobError {
    #[error("durable storage unavailable: {0}")]
    Unavailable(String),
    #[error("durable storage write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// Owned durable storage: one namespaced blob holding the serialized JSON map
/// of persisted entries. No schema migration support is assumed; readers treat
/// unreadable blobs as empty.
pub trait DurableBlob: Send + Sync {
    fn load(&self) -> Result<Option<String>, DurableBlobError>;
    fn store(&self, blob: &str) -> Result<(), DurableBlobError>;
    fn clear(&self) -> Result<(), DurableBlobError>;
}

/// File-backed blob at `<dir>/<namespace>.cache.json`.
pub struct FileBlob {
    path: PathBuf,
}

impl FileBlob {
    pub fn new(dir: impl Into<PathBuf>, namespace: &str) -> Self {
        let mut path: PathBuf = dir.into();
        std::fs::create_dir_all(&path).ok();
        path.push(format!("{}.cache.json", namespace));
        Self { path }
    }
}

impl DurableBlob for FileBlob {
    fn load(&self) -> Result<Option<String>, DurableBlobError> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DurableBlobError::Unavailable(e.to_string())),
        }
    }

    fn store(&self, blob: &str) -> Result<(), DurableBlobError> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), DurableBlobError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DurableBlobError::Write(e)),
        }
    }
}

/// In-memory blob for tests and storage-less hosts. Write failures can be
/// staged to exercise the degradation path.
pub struct MemoryBlob {
    inner: RwLock<Option<String>>,
    fail_writes: AtomicBool,
}

impl MemoryBlob {
    pub fn new() -> Self {
        Self { inner: RwLock::new(None), fail_writes: AtomicBool::new(false) }
    }

    pub fn with_contents(blob: impl Into<String>) -> Self {
        Self { inner: RwLock::new(Some(blob.into())), fail_writes: AtomicBool::new(false) }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Option<String> {
        self.inner.read().clone()
    }
}

impl Default for MemoryBlob {
    fn default() -> Self { Self::new() }
}

impl DurableBlob for MemoryBlob {
    fn load(&self) -> Result<Option<String>, DurableBlobError> {
        Ok(self.inner.read().clone())
    }

    fn store(&self, blob: &str) -> Result<(), DurableBlobError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DurableBlobError::Unavailable("quota exceeded".into()));
        }
        *self.inner.write() = Some(blob.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), DurableBlobError> {
        *self.inner.write() = None;
        Ok(())
    }
}

#[derive(Clone)]
struct Entry {
    tier: Tier,
    payload: JsonValue,
    fetched_at: i64,
    persisted: bool,
}

/// Durable wire form of one entry: `[tier, fetched_at_ms, payload]`.
type DurableEntry = (u8, i64, JsonValue);
type DurableMap = HashMap<String, DurableEntry>;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Persistence-policy engine in front of the kernel's fetch cache.
///
/// All fetched values live in the in-memory map; the subset passing
/// `PersistencePolicy::should_persist` (and not classified `Tier::Atomic`) is
/// mirrored into the durable blob. Expiry is enforced at read time against
/// `max_age_ms`; stale entries are treated as absent and purged.
pub struct TieredCacheStore {
    policy: PersistencePolicy,
    durable: Arc<dyn DurableBlob>,
    map: RwLock<HashMap<String, Entry>>,
    max_age_ms: i64,
    persistence_enabled: bool,
    degraded: AtomicBool,
}

impl TieredCacheStore {
    /// Build the store and hydrate the in-memory map from the durable blob.
    /// Corrupt blobs hydrate as empty; entries that are stale, atomic-tier or
    /// no longer pass the policy are dropped and the blob rewritten.
    pub fn new(
        durable: Arc<dyn DurableBlob>,
        policy: PersistencePolicy,
        max_age_ms: i64,
        persistence_enabled: bool,
    ) -> Self {
        let store = Self {
            policy,
            durable,
            map: RwLock::new(HashMap::new()),
            max_age_ms,
            persistence_enabled,
            degraded: AtomicBool::new(false),
        };
        store.hydrate();
        store
    }

    fn hydrate(&self) {
        let raw = match self.durable.load() {
            Ok(Some(s)) => s,
            Ok(None) => return,
            Err(e) => {
                warn!(target: "vestibule::cache", "durable load failed, memory-only: {}", e);
                self.degraded.store(true, Ordering::SeqCst);
                return;
            }
        };
        // Unreadable or corrupt blobs are treated as empty.
        let parsed: DurableMap = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(target: "vestibule::cache", "corrupt durable blob treated as empty: {}", e);
                return;
            }
        };
        let now = now_ms();
        let mut dropped = 0usize;
        {
            let mut w = self.map.write();
            for (key, (tier_u8, fetched_at, payload)) in parsed {
                let Some(tier) = Tier::from_u8(tier_u8) else { dropped += 1; continue };
                let stale = now.saturating_sub(fetched_at) > self.max_age_ms;
                // Re-check the policy on the way in: a blob written by an older
                // policy (or tampered with) must not resurrect refused keys.
                if stale || tier == Tier::Atomic || !self.policy.should_persist(&key) {
                    dropped += 1;
                    continue;
                }
                w.insert(key, Entry { tier, payload, fetched_at, persisted: true });
            }
        }
        debug!(target: "vestibule::cache", "hydrated {} entries, dropped {}", self.len(), dropped);
        if dropped > 0 {
            self.rewrite_durable();
        }
    }

    /// Read a key. Entries older than the max age are treated as absent and
    /// purged from both memory and durable storage.
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        let now = now_ms();
        let expired = {
            let r = self.map.read();
            match r.get(key) {
                Some(ent) => {
                    if now.saturating_sub(ent.fetched_at) > self.max_age_ms {
                        true
                    } else {
                        return Some(ent.payload.clone());
                    }
                }
                None => return None,
            }
        };
        if expired {
            let was_persisted = {
                let mut w = self.map.write();
                w.remove(key).map(|e| e.persisted).unwrap_or(false)
            };
            if was_persisted {
                self.rewrite_durable();
            }
        }
        None
    }

    /// Store a value under the given key and tier. Persistence happens only
    /// when the policy allows the key AND the tier is not atomic; atomic
    /// entries are refused at this seam regardless of what the policy says.
    pub fn put(&self, key: impl Into<String>, tier: Tier, payload: JsonValue) {
        let key = key.into();
        let persist = self.persistence_enabled
            && !self.degraded.load(Ordering::SeqCst)
            && tier != Tier::Atomic
            && self.policy.should_persist(&key);
        let previously_persisted = {
            let mut w = self.map.write();
            let prev = w.get(&key).map(|e| e.persisted).unwrap_or(false);
            w.insert(key, Entry { tier, payload, fetched_at: now_ms(), persisted: persist });
            prev
        };
        if persist || previously_persisted {
            self.rewrite_durable();
        }
    }

    /// Get-or-load: serve from cache when present, otherwise run the loader
    /// and store its result under the tier's persistence rules.
    pub async fn fetch<F>(&self, key: &str, tier: Tier, loader: F) -> Result<JsonValue>
    where
        F: std::future::Future<Output = Result<JsonValue>>,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let v = loader.await?;
        self.put(key, tier, v.clone());
        Ok(v)
    }

    /// Remove expired entries. Returns number removed.
    pub fn sweep(&self) -> usize {
        let now = now_ms();
        let mut any_persisted = false;
        let removed = {
            let mut w = self.map.write();
            let stale: Vec<String> = w
                .iter()
                .filter(|(_, e)| now.saturating_sub(e.fetched_at) > self.max_age_ms)
                .map(|(k, _)| k.clone())
                .collect();
            for k in &stale {
                if let Some(e) = w.remove(k) {
                    any_persisted |= e.persisted;
                }
            }
            stale.len()
        };
        if any_persisted {
            self.rewrite_durable();
        }
        removed
    }

    /// Sign-out teardown: clear the memory map and the durable blob.
    pub fn purge_all(&self) {
        self.map.write().clear();
        if let Err(e) = self.durable.clear() {
            warn!(target: "vestibule::cache", "durable clear failed: {}", e);
        }
    }

    /// Keys currently present in durable storage, read back from the blob.
    /// Used to check the guarantee that the durable key set is a subset of
    /// the allow-list minus the denylist.
    pub fn durable_keys(&self) -> Vec<String> {
        let Ok(Some(raw)) = self.durable.load() else { return Vec::new() };
        let Ok(parsed) = serde_json::from_str::<DurableMap>(&raw) else { return Vec::new() };
        let mut keys: Vec<String> = parsed.into_keys().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    fn rewrite_durable(&self) {
        if !self.persistence_enabled || self.degraded.load(Ordering::SeqCst) {
            return;
        }
        let durable_map: DurableMap = {
            let r = self.map.read();
            r.iter()
                .filter(|(_, e)| e.persisted)
                .map(|(k, e)| (k.clone(), (e.tier.as_u8(), e.fetched_at, e.payload.clone())))
                .collect()
        };
        let blob = match serde_json::to_string(&durable_map) {
            Ok(s) => s,
            Err(e) => {
                warn!(target: "vestibule::cache", "durable serialize failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.durable.store(&blob) {
            // Not fatal: degrade to memory-only and stop attempting writes.
            warn!(target: "vestibule::cache", "durable write failed, degrading to memory-only: {}", e);
            self.degraded.store(true, Ordering::SeqCst);
        }
    }
}
