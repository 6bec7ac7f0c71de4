//! Input and display restrictions applied for the duration of a session.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ProctorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    ContextMenu,
    KeyboardShortcuts,
    Fullscreen,
    TextSelection,
    Clipboard,
}

impl Restriction {
    pub const ALL: [Restriction; 5] = [
        Restriction::ContextMenu,
        Restriction::KeyboardShortcuts,
        Restriction::Fullscreen,
        Restriction::TextSelection,
        Restriction::Clipboard,
    ];

    /// Key combinations the host must suppress while this restriction holds.
    pub fn blocked_shortcuts(self) -> &'static [&'static str] {
        match self {
            Restriction::KeyboardShortcuts => &BLOCKED_SHORTCUTS,
            _ => &[],
        }
    }
}

/// Key combinations suppressed while keyboard shortcuts are locked:
/// developer tools, view source, save, print and select-all.
pub const BLOCKED_SHORTCUTS: [&str; 8] = [
    "F12",
    "Ctrl+Shift+I",
    "Ctrl+Shift+J",
    "Ctrl+Shift+C",
    "Ctrl+U",
    "Ctrl+S",
    "Ctrl+P",
    "Ctrl+A",
];

/// The display environment that enforces restrictions.
pub trait LockdownHost: Send + Sync {
    fn apply(&self, restriction: Restriction) -> Result<()>;

    fn lift(&self, restriction: Restriction) -> Result<()>;

    fn is_fullscreen(&self) -> bool;
}

pub struct LockdownController {
    host: Arc<dyn LockdownHost>,
    engaged: Mutex<BTreeSet<Restriction>>,
}

impl LockdownController {
    pub fn new(host: Arc<dyn LockdownHost>) -> Self {
        Self {
            host,
            engaged: Mutex::new(BTreeSet::new()),
        }
    }

    /// Apply every restriction. A failing restriction does not prevent the
    /// others from being applied.
    pub async fn engage(&self) -> Result<()> {
        let mut engaged = self.engaged.lock().await;
        let mut failures = Vec::new();

        for restriction in Restriction::ALL {
            if engaged.contains(&restriction) {
                continue;
            }
            match self.host.apply(restriction) {
                Ok(()) => {
                    engaged.insert(restriction);
                }
                Err(e) => {
                    tracing::warn!(restriction = ?restriction, error = %e, "Failed to apply restriction");
                    failures.push(format!("{:?}: {}", restriction, e));
                }
            }
        }

        if failures.is_empty() {
            tracing::info!(shortcuts = ?BLOCKED_SHORTCUTS, "Lockdown engaged");
            Ok(())
        } else {
            Err(ProctorError::LockdownEngageFailed(failures.join("; ")))
        }
    }

    /// Reverse every engaged restriction and leave full-screen if the host is
    /// still in it. Restrictions that were never engaged are skipped.
    pub async fn disengage(&self) -> Result<usize> {
        let mut engaged = self.engaged.lock().await;
        let mut lifted = 0;
        let mut failures = Vec::new();

        for restriction in Restriction::ALL {
            let needs_lift = match restriction {
                Restriction::Fullscreen => self.host.is_fullscreen(),
                _ => engaged.contains(&restriction),
            };
            if !needs_lift {
                engaged.remove(&restriction);
                continue;
            }

            match self.host.lift(restriction) {
                Ok(()) => {
                    engaged.remove(&restriction);
                    lifted += 1;
                }
                Err(e) => {
                    tracing::error!(restriction = ?restriction, error = %e, "Failed to lift restriction");
                    failures.push(format!("{:?}: {}", restriction, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(lifted)
        } else {
            Err(ProctorError::LockdownReleaseFailed(failures.join("; ")))
        }
    }

    pub async fn engaged(&self) -> Vec<Restriction> {
        self.engaged.lock().await.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proctoring::memory::MemoryLockdownHost;

    #[tokio::test]
    async fn test_engage_then_disengage() {
        let host = Arc::new(MemoryLockdownHost::default());
        let controller = LockdownController::new(host.clone());

        controller.engage().await.unwrap();
        assert_eq!(controller.engaged().await.len(), 5);
        assert!(host.is_fullscreen());

        assert_eq!(controller.disengage().await.unwrap(), 5);
        assert!(controller.engaged().await.is_empty());
        assert!(host.active().is_empty());
    }

    #[tokio::test]
    async fn test_disengage_without_engage_is_noop() {
        let host = Arc::new(MemoryLockdownHost::default());
        let controller = LockdownController::new(host.clone());

        assert_eq!(controller.disengage().await.unwrap(), 0);
        assert_eq!(host.lift_calls(), 0);
    }

    #[tokio::test]
    async fn test_disengage_exits_fullscreen_entered_elsewhere() {
        let host = Arc::new(MemoryLockdownHost::default());
        host.apply(Restriction::Fullscreen).unwrap();
        let controller = LockdownController::new(host.clone());

        assert_eq!(controller.disengage().await.unwrap(), 1);
        assert!(!host.is_fullscreen());
    }

    #[tokio::test]
    async fn test_disengage_continues_after_failure() {
        let host = Arc::new(MemoryLockdownHost::failing_lift(Restriction::ContextMenu));
        let controller = LockdownController::new(host.clone());
        controller.engage().await.unwrap();

        let err = controller.disengage().await.unwrap_err();
        assert!(matches!(err, ProctorError::LockdownReleaseFailed(_)));
        assert_eq!(host.active(), vec![Restriction::ContextMenu]);
        assert_eq!(controller.engaged().await, vec![Restriction::ContextMenu]);
    }
}
