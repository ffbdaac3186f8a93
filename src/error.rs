//! Unified kernel error model and mapping helpers.
//! This module provides a common error enum used across the bootstrap kernel
//! (identity, capability, cache, handshake) along with classification helpers
//! that decide what, if anything, a consumer is allowed to surface.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelError {
    /// Identity provider unreachable or returned an unusable session check.
    Identity { code: String, message: String },
    /// Profile/capability lookup failed or produced a malformed role.
    Capability { code: String, message: String },
    /// Durable cache storage unavailable, unreadable or over quota.
    CachePersistence { code: String, message: String },
    /// Handshake did not reach READY within the imposed timeout.
    BootTimeout { code: String, message: String },
    Internal { code: String, message: String },
}

impl KernelError {
    pub fn code_str(&self) -> &str {
        match self {
            KernelError::Identity { code, .. }
            | KernelError::Capability { code, .. }
            | KernelError::CachePersistence { code, .. }
            | KernelError::BootTimeout { code, .. }
            | KernelError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            KernelError::Identity { message, .. }
            | KernelError::Capability { message, .. }
            | KernelError::CachePersistence { message, .. }
            | KernelError::BootTimeout { message, .. }
            | KernelError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn identity<S: Into<String>>(code: S, msg: S) -> Self { KernelError::Identity { code: code.into(), message: msg.into() } }
    pub fn capability<S: Into<String>>(code: S, msg: S) -> Self { KernelError::Capability { code: code.into(), message: msg.into() } }
    pub fn cache<S: Into<String>>(code: S, msg: S) -> Self { KernelError::CachePersistence { code: code.into(), message: msg.into() } }
    pub fn boot_timeout<S: Into<String>>(code: S, msg: S) -> Self { KernelError::BootTimeout { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { KernelError::Internal { code: code.into(), message: msg.into() } }

    /// Whether the error leaves the kernel able to continue degraded.
    /// Persistence failures degrade to memory-only; capability failures
    /// normalize to an unknown role. Neither is fatal to boot.
    pub fn is_recoverable(&self) -> bool {
        match self {
            KernelError::CachePersistence { .. } | KernelError::Capability { .. } => true,
            KernelError::BootTimeout { .. } => true,
            KernelError::Identity { .. } | KernelError::Internal { .. } => false,
        }
    }

    /// User-facing rendering. Only a boot timeout produces a visible retry
    /// affordance; every other variant stays internal (logged, never shown).
    pub fn user_facing(&self) -> Option<&'static str> {
        match self {
            KernelError::BootTimeout { .. } => Some("Something went wrong while loading. Retry?"),
            _ => None,
        }
    }
}

impl Display for KernelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for KernelError {}

pub type KernelResult<T> = Result<T, KernelError>;

impl From<anyhow::Error> for KernelError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Internal unless downcasted elsewhere
        KernelError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
