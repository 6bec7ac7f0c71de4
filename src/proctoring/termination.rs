use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::summary::SessionSummary;
use crate::error::ProctorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationKind {
    Normal,
    Forced,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Success,
    /// Only the local emergency copy was written
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryCause {
    IncompleteTermination,
    CriticalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationMetadata {
    pub termination_type: TerminationKind,
    pub data_backup_status: BackupStatus,
    pub cleanup_status: CleanupStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationResult {
    pub success: bool,
    pub session_id: String,
    pub termination_time: DateTime<Utc>,
    pub summary: SessionSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub metadata: TerminationMetadata,
}

impl TerminationResult {
    /// All-failed result used when termination could not run at all.
    pub fn failed(
        session_id: &str,
        at: DateTime<Utc>,
        error: String,
        recovery_actions: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            session_id: session_id.to_string(),
            termination_time: at,
            summary: SessionSummary::empty(),
            errors: vec![error],
            warnings: Vec::new(),
            metadata: TerminationMetadata {
                termination_type: TerminationKind::Error,
                data_backup_status: BackupStatus::Failed,
                cleanup_status: CleanupStatus::Failed,
                recovery_actions,
            },
        }
    }
}

/// Accumulates step failures so one failing step never stops the next.
#[derive(Debug, Default)]
pub struct StepLog {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StepLog {
    /// Record the outcome of one step. On failure the error is kept and the
    /// optional residual-risk warning is added.
    pub fn record<T>(
        &mut self,
        session_id: &str,
        step: &str,
        result: Result<T, ProctorError>,
        warning: Option<&str>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                tracing::debug!(session_id = %session_id, step, "Termination step completed");
                Some(value)
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, step, error = %e, "Termination step failed");
                self.errors.push(format!("{}: {}", step, e));
                if let Some(warning) = warning {
                    self.warnings.push(warning.to_string());
                }
                None
            }
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_log_continues_after_failure() {
        let mut log = StepLog::default();
        let first: Option<()> = log.record(
            "S1",
            "media release",
            Err(ProctorError::MediaReleaseFailed("v1".into())),
            Some("Some media streams may still be active"),
        );
        let second = log.record("S1", "lockdown removal", Ok(3usize), None);

        assert!(first.is_none());
        assert_eq!(second, Some(3));
        assert_eq!(log.errors.len(), 1);
        assert!(log.errors[0].starts_with("media release:"));
        assert_eq!(log.warnings, vec!["Some media streams may still be active"]);
        assert!(!log.is_clean());
    }

    #[test]
    fn test_failed_result_shape() {
        let result = TerminationResult::failed(
            "S1",
            Utc::now(),
            "Session S1 not found".to_string(),
            vec!["Cleared pending termination callbacks".to_string()],
        );
        assert!(!result.success);
        assert_eq!(result.summary.total_duration, 0);
        assert_eq!(result.metadata.termination_type, TerminationKind::Error);
        assert_eq!(result.metadata.data_backup_status, BackupStatus::Failed);
        assert_eq!(result.metadata.cleanup_status, CleanupStatus::Failed);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["metadata"]["terminationType"], "error");
        assert!(json.get("warnings").is_none());
    }
}
