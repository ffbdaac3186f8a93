//! Persistence-policy integration tests: the durable-subset guarantee, the
//! 24h read-time max age, and warm-boot priming through a real file blob.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;

use vestibule::boot::BootState;
use vestibule::cache::{FileBlob, MemoryBlob, PersistencePolicy, Tier, TieredCacheStore};
use vestibule::capability::Capability;
use vestibule::identity::{MemoryProfileService, Profile, StaticIdentityProvider};
use vestibule::kernel::Kernel;
use vestibule::settings::KernelSettings;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[test]
fn session_of_denylisted_fetches_leaves_no_durable_bytes() {
    let blob = Arc::new(MemoryBlob::new());
    let store = TieredCacheStore::new(blob.clone(), PersistencePolicy::default(), DAY_MS, true);

    store.put("payout.history.c-1", Tier::Atomic, json!([{"amount": 120000}]));
    store.put("invoice.detail.i-9", Tier::Metadata, json!({"total": 420}));
    store.put("profile.summary.u-1.email", Tier::Metadata, json!("pii@example.com"));
    store.put("txn.pending.t-3", Tier::Atomic, json!({"card": "4111"}));

    // Everything is served from memory, nothing reaches durable storage.
    assert!(store.get("payout.history.c-1").is_some());
    assert!(store.durable_keys().is_empty());
    assert!(blob.contents().is_none());
}

#[test]
fn durable_key_set_is_subset_of_allow_minus_deny() {
    let blob = Arc::new(MemoryBlob::new());
    let policy = PersistencePolicy::default();
    let store = TieredCacheStore::new(blob, policy.clone(), DAY_MS, true);

    // A session trace mixing every class of key.
    let trace = [
        ("capability.snapshot", Tier::Metadata),
        ("profile.summary.u-1", Tier::Metadata),
        ("nav.counts.c-1", Tier::Layout),
        ("settings.workspace.c-1", Tier::Layout),
        ("rfq.list.c-1", Tier::Layout),
        ("product.catalog", Tier::Structural),
        ("order.detail.o-7", Tier::Atomic),
        ("payout.history.c-1", Tier::Atomic),
        ("profile.summary.u-1.phone", Tier::Metadata),
    ];
    for (key, tier) in trace {
        store.put(key, tier, json!({"k": key}));
    }

    let durable = store.durable_keys();
    assert!(!durable.is_empty());
    for key in &durable {
        assert!(policy.should_persist(key), "leaked key: {}", key);
        assert!(!policy.denied(key));
    }
    assert!(!durable.iter().any(|k| k.contains("payout") || k.contains("order.detail")));
}

#[test]
fn persisted_entry_is_byte_identical_before_max_age_and_absent_after() {
    let blob = Arc::new(MemoryBlob::new());
    let payload = json!({"role": "seller", "company_id": "c-1", "counts": [3, 1, 4]});
    {
        let store = TieredCacheStore::new(blob.clone(), PersistencePolicy::default(), DAY_MS, true);
        store.put("capability.snapshot", Tier::Metadata, payload.clone());
    }

    // A fresh store over the same blob returns the identical payload.
    let store = TieredCacheStore::new(blob.clone(), PersistencePolicy::default(), DAY_MS, true);
    let read_back = store.get("capability.snapshot").expect("fresh entry present");
    assert_eq!(
        serde_json::to_string(&read_back).unwrap(),
        serde_json::to_string(&payload).unwrap()
    );

    // Same blob under a store whose max age has already elapsed: absent.
    std::thread::sleep(Duration::from_millis(30));
    let expired = TieredCacheStore::new(blob, PersistencePolicy::default(), 10, true);
    assert!(expired.get("capability.snapshot").is_none());
    assert!(expired.durable_keys().is_empty());
}

#[tokio::test]
async fn kernel_session_writes_only_policy_clean_keys_to_disk() {
    let tmp = tempdir().unwrap();
    let provider = Arc::new(StaticIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileService::new());
    profiles.insert_profile(Profile {
        subject_id: "u-1".into(),
        raw_role: Some("hybrid".into()),
        raw_user_role: None,
        company_id: Some("c-1".into()),
    });
    profiles.insert_counts("c-1", json!({"orders": 7, "rfqs": 2}));
    provider.sign_in("u-1", "h@example.com");

    let durable = Arc::new(FileBlob::new(tmp.path(), "vestibule"));
    let kernel = Kernel::new(provider, profiles, durable, KernelSettings::default());
    kernel.start();
    kernel.wait_ready().await.unwrap();

    let policy = PersistencePolicy::default();
    let durable = kernel.cache().durable_keys();
    assert!(durable.contains(&"capability.snapshot".to_string()));
    assert!(durable.contains(&"nav.counts.c-1".to_string()));
    for key in &durable {
        assert!(policy.should_persist(key), "leaked key: {}", key);
    }
}

#[tokio::test]
async fn second_kernel_over_the_same_file_primes_from_disk() {
    let tmp = tempdir().unwrap();
    let profiles = Arc::new(MemoryProfileService::new());
    profiles.insert_profile(Profile {
        subject_id: "u-1".into(),
        raw_role: Some("logistics_partner".into()),
        raw_user_role: None,
        company_id: Some("c-1".into()),
    });

    {
        let provider = Arc::new(StaticIdentityProvider::new());
        provider.sign_in("u-1", "l@example.com");
        let durable = Arc::new(FileBlob::new(tmp.path(), "vestibule"));
        let kernel = Kernel::new(provider, profiles.clone(), durable, KernelSettings::default());
        kernel.start();
        kernel.wait_ready().await.unwrap();
        assert_eq!(kernel.role(), Capability::Logistics);
    }

    // Returning visit: a slow provider no longer gates readiness.
    let provider = Arc::new(StaticIdentityProvider::new().with_latency(Duration::from_secs(5)));
    provider.sign_in("u-1", "l@example.com");
    let durable = Arc::new(FileBlob::new(tmp.path(), "vestibule"));
    let kernel = Kernel::new(provider, profiles, durable, KernelSettings::default());
    kernel.start();

    assert!(kernel.is_primed());
    assert_eq!(kernel.handshake_status(), BootState::Ready);
    assert_eq!(kernel.role(), Capability::Logistics);
}

#[tokio::test]
async fn corrupt_file_blob_boots_cold_without_error() {
    let tmp = tempdir().unwrap();
    std::fs::write(tmp.path().join("vestibule.cache.json"), b"{definitely not json").unwrap();

    let provider = Arc::new(StaticIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileService::new());
    provider.sign_in("u-1", "x@example.com");
    let durable = Arc::new(FileBlob::new(tmp.path(), "vestibule"));
    let kernel = Kernel::new(provider, profiles, durable, KernelSettings::default());
    kernel.start();

    assert!(!kernel.is_primed());
    kernel.wait_ready().await.unwrap();
}
