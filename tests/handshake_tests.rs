//! Handshake integration tests: the readiness race between optimistic cache
//! priming and the authoritative network batch, plus timeout and teardown
//! paths across the public kernel surface.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use vestibule::boot::BootState;
use vestibule::cache::MemoryBlob;
use vestibule::capability::Capability;
use vestibule::identity::{MemoryProfileService, Profile, StaticIdentityProvider};
use vestibule::kernel::Kernel;
use vestibule::settings::KernelSettings;

fn profile(subject: &str, role: &str, company: &str) -> Profile {
    Profile {
        subject_id: subject.into(),
        raw_role: Some(role.into()),
        raw_user_role: None,
        company_id: Some(company.into()),
    }
}

fn snapshot_blob(subject: &str, role: &str, company: &str) -> MemoryBlob {
    let now = chrono::Utc::now().timestamp_millis();
    let blob = json!({
        "capability.snapshot": [3, now, {"subject_id": subject, "role": role, "company_id": company}],
    });
    MemoryBlob::with_contents(blob.to_string())
}

#[tokio::test(start_paused = true)]
async fn fresh_boot_walks_resolving_hydrating_ready() {
    // Identity settles at t=200ms, the authoritative batch at t=500ms.
    let provider = Arc::new(StaticIdentityProvider::new().with_latency(Duration::from_millis(200)));
    let profiles = Arc::new(MemoryProfileService::new().with_latency(Duration::from_millis(300)));
    profiles.insert_profile(profile("u-1", "seller", "c-1"));
    profiles.insert_counts("c-1", json!({"orders": 2}));
    provider.sign_in("u-1", "a@example.com");

    let kernel = Kernel::new(provider, profiles, Arc::new(MemoryBlob::new()), KernelSettings::default());
    let mut rx = kernel.subscribe_status();
    let t0 = tokio::time::Instant::now();
    kernel.start();

    assert!(!kernel.is_primed());
    assert_eq!(*rx.borrow_and_update(), BootState::ResolvingIdentity);

    rx.changed().await.unwrap();
    let t_hydrating = t0.elapsed();
    assert_eq!(*rx.borrow_and_update(), BootState::HydratingKernel);
    assert!(t_hydrating >= Duration::from_millis(200));
    assert!(t_hydrating < Duration::from_millis(500));

    rx.changed().await.unwrap();
    let t_ready = t0.elapsed();
    assert_eq!(*rx.borrow_and_update(), BootState::Ready);
    assert!(t_ready >= Duration::from_millis(500));

    assert!(!kernel.is_primed());
    assert_eq!(kernel.role(), Capability::Seller);
    assert!(kernel.is_system_ready());
}

#[tokio::test(start_paused = true)]
async fn warm_boot_primes_synchronously_before_any_network_call() {
    let provider = Arc::new(StaticIdentityProvider::new().with_latency(Duration::from_millis(200)));
    let profiles = Arc::new(MemoryProfileService::new().with_latency(Duration::from_millis(300)));
    profiles.insert_profile(profile("u-1", "buyer", "c-1"));
    provider.sign_in("u-1", "a@example.com");

    let blob = Arc::new(snapshot_blob("u-1", "seller", "c-1"));
    let kernel = Kernel::new(provider, profiles, blob, KernelSettings::default());
    kernel.start();

    // No time has advanced: both the session check and the batch are still
    // in flight, yet the snapshot already made the kernel usable.
    assert!(kernel.is_primed());
    assert_eq!(kernel.handshake_status(), BootState::Ready);
    assert_eq!(kernel.role(), Capability::Seller);

    // Stale-while-revalidate: the authoritative batch later corrects the
    // role without ever leaving READY.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(kernel.role(), Capability::Buyer);
    assert_eq!(kernel.handshake_status(), BootState::Ready);
}

#[tokio::test]
async fn stale_snapshot_does_not_prime() {
    let provider = Arc::new(StaticIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileService::new());
    let old = chrono::Utc::now().timestamp_millis() - 25 * 60 * 60 * 1000;
    let blob = MemoryBlob::with_contents(
        json!({"capability.snapshot": [3, old, {"subject_id": "u-1", "role": "seller", "company_id": null}]}).to_string(),
    );

    let kernel = Kernel::new(provider, profiles, Arc::new(blob), KernelSettings::default());
    kernel.start();
    assert!(!kernel.is_primed());
    assert_eq!(kernel.role(), Capability::Unknown);
}

#[tokio::test]
async fn failed_batch_stays_hydrating_until_timeout_then_retry_recovers() {
    let provider = Arc::new(StaticIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileService::new());
    profiles.insert_profile(profile("u-1", "logistics_partner", "c-1"));
    profiles.set_failing(true);
    provider.sign_in("u-1", "a@example.com");

    let settings = KernelSettings { boot_timeout_ms: 100, ..KernelSettings::default() };
    let kernel = Kernel::new(provider, profiles.clone(), Arc::new(MemoryBlob::new()), settings);
    kernel.start();

    let err = kernel.wait_ready().await.expect_err("boot must miss its timeout");
    assert_eq!(kernel.handshake_status(), BootState::HydratingKernel);
    // Downstream treats capability as unknown rather than hanging.
    assert_eq!(kernel.role(), Capability::Unknown);
    // The only user-visible failure is the generic retry affordance.
    let shown = err.user_facing().expect("timeout is user-visible");
    assert!(shown.to_lowercase().contains("retry"));

    profiles.set_failing(false);
    kernel.retry_handshake().await;
    assert_eq!(kernel.handshake_status(), BootState::Ready);
    assert_eq!(kernel.role(), Capability::Logistics);
}

#[tokio::test]
async fn unreachable_provider_keeps_resolving_identity() {
    let provider = Arc::new(StaticIdentityProvider::new());
    provider.sign_in("u-1", "a@example.com");
    provider.set_unreachable(true);
    let profiles = Arc::new(MemoryProfileService::new());

    let settings = KernelSettings { boot_timeout_ms: 80, ..KernelSettings::default() };
    let kernel = Kernel::new(provider, profiles, Arc::new(MemoryBlob::new()), settings);
    kernel.start();

    assert!(kernel.wait_ready().await.is_err());
    assert!(!kernel.auth_ready());
    assert_eq!(kernel.handshake_status(), BootState::ResolvingIdentity);
}

#[tokio::test]
async fn signed_out_boot_settles_ready_with_unknown_role() {
    let provider = Arc::new(StaticIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileService::new());

    let kernel = Kernel::new(provider, profiles, Arc::new(MemoryBlob::new()), KernelSettings::default());
    kernel.start();
    kernel.wait_ready().await.unwrap();

    assert!(kernel.auth_ready());
    assert!(kernel.identity().is_none());
    assert_eq!(kernel.role(), Capability::Unknown);
}

#[tokio::test]
async fn sign_out_event_resets_and_purges() {
    let provider = Arc::new(StaticIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileService::new());
    profiles.insert_profile(profile("u-1", "hybrid", "c-1"));
    provider.sign_in("u-1", "a@example.com");
    let blob = Arc::new(MemoryBlob::new());

    let kernel = Kernel::new(provider.clone(), profiles, blob.clone(), KernelSettings::default());
    kernel.start();
    kernel.wait_ready().await.unwrap();
    assert!(kernel.is_hybrid());
    assert!(!kernel.cache().durable_keys().is_empty());

    // Provider-initiated sign-out flows through the event pump.
    provider.sign_out();
    // Allow the pump to run the teardown and the follow-up resolve.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(kernel.role(), Capability::Unknown);
    assert!(kernel.cache().durable_keys().is_empty());
    assert!(kernel.identity().is_none());
}

#[tokio::test]
async fn token_refresh_does_not_disturb_readiness() {
    let provider = Arc::new(StaticIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileService::new());
    profiles.insert_profile(profile("u-1", "buyer", "c-1"));
    provider.sign_in("u-1", "a@example.com");

    let kernel = Kernel::new(provider.clone(), profiles, Arc::new(MemoryBlob::new()), KernelSettings::default());
    kernel.start();
    kernel.wait_ready().await.unwrap();

    provider.refresh_token().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(kernel.auth_ready());
    assert_eq!(kernel.handshake_status(), BootState::Ready);
    assert_eq!(kernel.role(), Capability::Buyer);
}
