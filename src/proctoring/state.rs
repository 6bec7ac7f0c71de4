use serde::{Deserialize, Serialize};

/// Lifecycle state of a proctoring session.
///
/// Transitions are one-way: a session leaves `Active` exactly once and never
/// returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Terminated,
    Error,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    /// Returns the next state, or `None` when the move is not allowed.
    pub fn transition(self, to: SessionStatus) -> Option<SessionStatus> {
        match (self, to) {
            (SessionStatus::Active, SessionStatus::Active) => None,
            (SessionStatus::Active, next) => Some(next),
            _ => None,
        }
    }
}
