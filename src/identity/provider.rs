use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use crate::tprintln;

pub type SessionToken = String;

/// Identity as reported by the external provider. Created on sign-in,
/// destroyed on sign-out; owned exclusively by the identity layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub subject_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Change notifications emitted by the provider's event stream.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

/// External identity provider seam. `get_session` must resolve definitively:
/// `Ok(Some)` for a live session, `Ok(None)` for a confirmed absence, `Err`
/// only when the provider itself is unreachable.
pub trait IdentityProvider: Send + Sync {
    fn get_session(&self) -> BoxFuture<'static, Result<Option<Session>>>;
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

fn gen_token() -> SessionToken {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

struct ProviderState {
    current: Option<(SessionToken, Session)>,
    /// token -> session, kept so refreshes can validate the bearer
    issued: HashMap<SessionToken, Session>,
    unreachable: bool,
}

/// In-process identity provider used by the dev harness and tests. Issues
/// opaque bearer tokens and broadcasts change events the way a hosted
/// provider's notification stream would.
pub struct StaticIdentityProvider {
    state: Arc<RwLock<ProviderState>>,
    events: broadcast::Sender<AuthEvent>,
    ttl: Duration,
    /// Simulated network latency applied to session checks.
    latency: Option<Duration>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(RwLock::new(ProviderState { current: None, issued: HashMap::new(), unreachable: false })),
            events,
            ttl: Duration::from_secs(60 * 60),
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate the provider being unreachable; session checks will error
    /// until cleared. Sign-in/out still work so tests can stage recovery.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.write().unreachable = unreachable;
    }

    pub fn sign_in(&self, subject_id: impl Into<String>, email: impl Into<String>) -> Session {
        let now = Utc::now();
        let session = Session {
            subject_id: subject_id.into(),
            email: email.into(),
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1)),
        };
        let token = gen_token();
        {
            let mut st = self.state.write();
            st.issued.insert(token.clone(), session.clone());
            st.current = Some((token, session.clone()));
        }
        tprintln!("provider.sign_in subject={} expires_at={}", session.subject_id, session.expires_at);
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        session
    }

    pub fn sign_out(&self) {
        {
            let mut st = self.state.write();
            if let Some((token, _)) = st.current.take() {
                st.issued.remove(&token);
            }
        }
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    /// Rotate the bearer token and extend expiry. Emits TOKEN_REFRESHED; the
    /// resolver must treat this as an expiry update, never a sign-out.
    pub fn refresh_token(&self) -> Option<Session> {
        let refreshed = {
            let mut st = self.state.write();
            let (old_token, mut session) = st.current.take()?;
            st.issued.remove(&old_token);
            session.expires_at = Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1));
            let token = gen_token();
            st.issued.insert(token.clone(), session.clone());
            st.current = Some((token, session.clone()));
            session
        };
        let _ = self.events.send(AuthEvent::TokenRefreshed(refreshed.clone()));
        Some(refreshed)
    }
}

impl Default for StaticIdentityProvider {
    fn default() -> Self { Self::new() }
}

impl IdentityProvider for StaticIdentityProvider {
    fn get_session(&self) -> BoxFuture<'static, Result<Option<Session>>> {
        let state = self.state.clone();
        let latency = self.latency;
        Box::pin(async move {
            if let Some(d) = latency {
                tokio::time::sleep(d).await;
            }
            let st = state.read();
            if st.unreachable {
                return Err(anyhow!("identity provider unreachable"));
            }
            Ok(st.current.as_ref().map(|(_, s)| s.clone()))
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
