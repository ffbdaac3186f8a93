//! Route authorization: per protected area, decide whether to render, hold a
//! neutral placeholder, or silently redirect to the caller's canonical home.
//! Authorization mismatches never produce a user-visible error; the redirect
//! replaces history so the back button cannot loop through it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::boot::BootState;
use crate::capability::Capability;

/// Canonical home path for a resolved role; the role-selection path when the
/// role could not be determined.
pub fn home_path(role: Capability) -> &'static str {
    match role {
        Capability::Buyer => "/buyer/dashboard",
        Capability::Seller => "/seller/dashboard",
        Capability::Hybrid => "/hybrid/dashboard",
        Capability::Logistics => "/logistics/dashboard",
        Capability::Unknown => "/select-role",
    }
}

/// The one canonical path->role mapping: the first path segment names the
/// area. Anything else resolves to `Unknown`.
pub fn role_for_path(path: &str) -> Capability {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    match first {
        "buyer" => Capability::Buyer,
        "seller" => Capability::Seller,
        "hybrid" => Capability::Hybrid,
        "logistics" => Capability::Logistics,
        _ => Capability::Unknown,
    }
}

/// A protected route: a path prefix and the set of capabilities allowed in.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub path_prefix: String,
    pub allow: Vec<Capability>,
}

impl RouteRule {
    pub fn new(path_prefix: impl Into<String>, allow: Vec<Capability>) -> Self {
        Self { path_prefix: path_prefix.into(), allow }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Render,
    /// Neutral placeholder: handshake not settled, or a mismatch whose target
    /// equals the current path (no navigation to issue).
    Placeholder,
    /// Silent redirect with history replacement.
    Redirect { to: String },
}

/// Pure decision function. While the handshake is not READY the answer is
/// always Placeholder, never the protected content and never an error. Once
/// settled, a role outside the allow set is redirected to its own canonical
/// home, unless it is already there.
pub fn evaluate_route(
    status: BootState,
    role: Capability,
    rule: &RouteRule,
    current_path: &str,
) -> GuardDecision {
    if status != BootState::Ready {
        return GuardDecision::Placeholder;
    }
    if role != Capability::Unknown && rule.allow.contains(&role) {
        return GuardDecision::Render;
    }
    let target = home_path(role);
    if current_path == target {
        return GuardDecision::Placeholder;
    }
    GuardDecision::Redirect { to: target.to_string() }
}

/// Navigation seam the host application implements (history replacement).
pub trait Navigator: Send + Sync {
    fn replace(&self, path: &str);
}

/// Recording navigator for tests and the dev harness.
#[derive(Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn replace(&self, path: &str) {
        self.history.lock().push(path.to_string());
    }
}

/// Stateful guard wrapper: re-evaluated on every role or location change, it
/// issues at most one navigation per settled (role, path) state so unchanged
/// re-renders never retrigger a redirect.
pub struct RouteGuard {
    navigator: Arc<dyn Navigator>,
    last_issued: Mutex<Option<(Capability, String, String)>>,
}

impl RouteGuard {
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self { navigator, last_issued: Mutex::new(None) }
    }

    /// Evaluate and, on a redirect decision, perform the navigation unless an
    /// identical one was already issued for this settled state.
    pub fn enforce(
        &self,
        status: BootState,
        role: Capability,
        rule: &RouteRule,
        current_path: &str,
    ) -> GuardDecision {
        let decision = evaluate_route(status, role, rule, current_path);
        if let GuardDecision::Redirect { to } = &decision {
            let key = (role, current_path.to_string(), to.clone());
            let mut last = self.last_issued.lock();
            if last.as_ref() != Some(&key) {
                debug!(target: "vestibule::guard", "redirect {} -> {} (role={})", current_path, to, role.as_str());
                self.navigator.replace(to);
                *last = Some(key);
            }
        }
        decision
    }
}
