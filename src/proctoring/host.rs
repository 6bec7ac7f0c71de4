//! Collaborators provided by the environment hosting an exam client.
//!
//! A [`SessionHost`] bundles everything the state machine needs from the
//! client side: the capability probe, the lockdown surface, the on-device
//! ephemeral stores and a notification sink. The WebSocket channel provides
//! a host per connection; embedders can assemble one from the in-memory
//! implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::lockdown::{LockdownHost, Restriction};
use super::probe::SystemProbe;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageScope {
    Session,
    Local,
    IndexedDb,
    Cookies,
}

/// On-device storage holding session-scoped cache entries.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    fn scope(&self) -> StorageScope;

    /// Remove every entry keyed by (or tagged with) the session id.
    /// Returns the number of entries removed.
    async fn clear_session(&self, session_id: &str) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Transient user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotificationLevel, message: &str);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Error => tracing::error!(%message, "Notification"),
            NotificationLevel::Warning => tracing::warn!(%message, "Notification"),
            _ => tracing::info!(level = ?level, %message, "Notification"),
        }
    }
}

/// Lockdown surface for clients that enforce restrictions themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLockdownHost;

impl LockdownHost for DetachedLockdownHost {
    fn apply(&self, restriction: Restriction) -> Result<()> {
        tracing::debug!(restriction = ?restriction, "Restriction delegated to client");
        Ok(())
    }

    fn lift(&self, restriction: Restriction) -> Result<()> {
        tracing::debug!(restriction = ?restriction, "Restriction release delegated to client");
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct SessionHost {
    pub probe: Arc<dyn SystemProbe>,
    pub lockdown: Arc<dyn LockdownHost>,
    pub ephemeral: Vec<Arc<dyn EphemeralStore>>,
    pub notifier: Arc<dyn Notifier>,
}

impl SessionHost {
    /// Host for a client that manages its own lockdown and storage and only
    /// reports telemetry.
    pub fn detached(probe: Arc<dyn SystemProbe>) -> Self {
        Self {
            probe,
            lockdown: Arc::new(DetachedLockdownHost),
            ephemeral: Vec::new(),
            notifier: Arc::new(TracingNotifier),
        }
    }
}
