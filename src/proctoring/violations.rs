use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::session::ProctoringSession;
use crate::error::{ProctorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    TabSwitch,
    WindowBlur,
    FullscreenExit,
    RightClick,
    DevTools,
    NetworkDisconnect,
    CameraDisabled,
    MicrophoneDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A recorded rule infraction. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Generate a violation id from the timestamp plus a random suffix.
pub fn generate_violation_id(at: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("violation_{}_{}", at.timestamp_millis(), suffix)
}

/// Append-only violation record for a session.
pub struct ViolationLog;

impl ViolationLog {
    pub fn append(
        session: &mut ProctoringSession,
        violation_type: ViolationType,
        severity: Severity,
        description: impl Into<String>,
        metadata: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Result<ViolationEvent> {
        if !session.is_active() {
            return Err(ProctorError::SessionNotActive(session.session_id.clone()));
        }

        let event = ViolationEvent {
            id: generate_violation_id(at),
            violation_type,
            timestamp: at,
            severity,
            description: description.into(),
            metadata,
        };

        tracing::warn!(
            session_id = %session.session_id,
            violation = ?violation_type,
            severity = ?severity,
            "Proctoring violation recorded"
        );

        session.violations.push(event.clone());
        Ok(event)
    }

    pub fn count_of(session: &ProctoringSession, types: &[ViolationType]) -> usize {
        session
            .violations
            .iter()
            .filter(|v| types.contains(&v.violation_type))
            .count()
    }
}
