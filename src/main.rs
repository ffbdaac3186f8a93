use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use vestibule::boot::BootState;
use vestibule::cache::FileBlob;
use vestibule::guard::{evaluate_route, RouteRule};
use vestibule::identity::{MemoryProfileService, Profile, StaticIdentityProvider};
use vestibule::kernel::Kernel;
use vestibule::capability::Capability;
use vestibule::settings::KernelSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let data_dir = std::env::var("VESTIBULE_DATA_DIR").unwrap_or_else(|_| ".vestibule".to_string());
    let settings = KernelSettings::load_or_default(Path::new(&data_dir));
    info!(
        target: "vestibule",
        "vestibule starting: data_dir='{}', namespace='{}', boot_timeout_ms={}",
        data_dir, settings.namespace, settings.boot_timeout_ms
    );

    // Simulated collaborators with network-ish latency so the handshake
    // sequence is observable in the logs. A second run primes from the
    // snapshot written by the first and reports READY immediately.
    let provider = Arc::new(StaticIdentityProvider::new().with_latency(Duration::from_millis(200)));
    let profiles = Arc::new(MemoryProfileService::new().with_latency(Duration::from_millis(300)));
    profiles.insert_profile(Profile {
        subject_id: "u-demo".into(),
        raw_role: Some("Seller".into()),
        raw_user_role: None,
        company_id: Some("c-demo".into()),
    });
    profiles.insert_counts("c-demo", serde_json::json!({"orders": 4, "rfqs": 2, "invoices": 1}));
    provider.sign_in("u-demo", "demo@example.com");

    let durable = Arc::new(FileBlob::new(&data_dir, &settings.namespace));
    let kernel = Kernel::new(provider, profiles, durable, settings);

    let status_rx = kernel.subscribe_status();
    kernel.start();
    info!(target: "vestibule", "primed={} status={:?}", kernel.is_primed(), kernel.handshake_status());

    // Log each transition until READY or the timeout's retry affordance.
    loop {
        if *status_rx.borrow() == BootState::Ready {
            break;
        }
        match kernel.wait_ready().await {
            Ok(()) => break,
            Err(e) => {
                info!(target: "vestibule", "{}", e.user_facing().unwrap_or("retry"));
                kernel.retry_handshake().await;
            }
        }
    }

    info!(
        target: "vestibule",
        "ready: role={} is_seller={} primed={}",
        kernel.role().as_str(), kernel.is_seller(), kernel.is_primed()
    );

    // Guard demo: a seller landing on a buyer-only area gets a silent
    // redirect to the canonical seller home.
    let rule = RouteRule::new("/buyer", vec![Capability::Buyer, Capability::Hybrid]);
    let decision = evaluate_route(kernel.handshake_status(), kernel.role(), &rule, "/buyer/orders");
    info!(target: "vestibule", "guard decision for /buyer/orders: {:?}", decision);

    Ok(())
}
