//!
//! vestibule cache module
//! -----------------------
//! This module implements the tiered persistence policy sitting in front of
//! the kernel's key->value fetch cache. Every successful fetch lands in the
//! in-memory map; a policy decision made per key controls whether the entry
//! is additionally written to durable storage, a single namespaced JSON blob
//! of the form `{key: [tier, fetched_at_ms, payload]}`.
//!
//! Key responsibilities:
//! - Allow-list/denylist persistence decisions with the denylist always winning.
//! - A hard refusal of atomic/financial (L4) entries at the write path.
//! - Read-time max-age enforcement (default 24h) with purge of stale entries.
//! - Silent degradation to memory-only operation when storage fails.
//!
//! The public API centers around `TieredCacheStore`, which is wrapped in an
//! `Arc` and shared between the capability layer and the boot orchestrator.

mod policy;
mod store;

pub use policy::{PersistencePolicy, Tier};
pub use store::{DurableBlob, DurableBlobError, FileBlob, MemoryBlob, TieredCacheStore};
