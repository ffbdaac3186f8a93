use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::provider::{AuthEvent, IdentityProvider, Session};

#[derive(Default)]
struct IdentityState {
    auth_ready: bool,
    identity: Option<Session>,
}

/// Wraps the external identity provider and reports when identity is known,
/// either present or definitively absent. `auth_ready` only flips true after
/// a definitive provider answer; a provider error keeps it false (fail-closed)
/// so consumers keep showing a loading state instead of guessing.
pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    state: Arc<RwLock<IdentityState>>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider, state: Arc::new(RwLock::new(IdentityState::default())) }
    }

    /// Run the initial definitive session check. Returns the resulting
    /// `auth_ready` flag. Errors are logged and swallowed; the resolver stays
    /// not-ready and the caller may retry.
    pub async fn resolve(&self) -> bool {
        match self.provider.get_session().await {
            Ok(session) => {
                let mut st = self.state.write();
                st.identity = session;
                st.auth_ready = true;
                debug!(target: "vestibule::identity", "session check settled: present={}", st.identity.is_some());
                true
            }
            Err(e) => {
                warn!(target: "vestibule::identity", "session check failed, staying not-ready: {}", e);
                false
            }
        }
    }

    pub fn auth_ready(&self) -> bool {
        self.state.read().auth_ready
    }

    pub fn identity(&self) -> Option<Session> {
        self.state.read().identity.clone()
    }

    /// Sign-out teardown: drop the identity and require a fresh definitive
    /// check before `auth_ready` reports true again.
    pub fn reset(&self) {
        let mut st = self.state.write();
        st.identity = None;
        st.auth_ready = false;
    }

    /// Apply a provider change notification. Sign-in/out are definitive
    /// answers and set `auth_ready`; TOKEN_REFRESHED only updates expiry and
    /// must never reset `auth_ready`.
    pub fn apply_event(&self, ev: &AuthEvent) {
        let mut st = self.state.write();
        match ev {
            AuthEvent::SignedIn(session) => {
                st.identity = Some(session.clone());
                st.auth_ready = true;
            }
            AuthEvent::SignedOut => {
                st.identity = None;
                st.auth_ready = true;
            }
            AuthEvent::TokenRefreshed(session) => {
                match st.identity.as_mut() {
                    Some(current) if current.subject_id == session.subject_id => {
                        current.expires_at = session.expires_at;
                    }
                    Some(_) | None => {
                        // Refresh for a session we never observed; adopt it but
                        // leave auth_ready untouched until a definitive check.
                        st.identity = Some(session.clone());
                    }
                }
            }
        }
    }
}
