use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::probe::SystemMetrics;
use super::resources::{CaptureStream, MonitoringProcess};
use super::state::SessionStatus;
use super::violations::ViolationEvent;

/// One proctored exam attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctoringSession {
    pub session_id: String,
    pub student_id: String,
    pub quiz_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub violations: Vec<ViolationEvent>,
    pub system_metrics: SystemMetrics,
    /// Capture handles are process-local and never leave the service
    #[serde(skip)]
    pub media_streams: Vec<CaptureStream>,
    pub monitoring_processes: Vec<MonitoringProcess>,
}

impl ProctoringSession {
    pub fn new(
        student_id: &str,
        quiz_id: &str,
        session_id: &str,
        start_time: DateTime<Utc>,
        system_metrics: SystemMetrics,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            quiz_id: quiz_id.to_string(),
            start_time,
            end_time: None,
            status: SessionStatus::Active,
            violations: Vec::new(),
            system_metrics,
            media_streams: Vec::new(),
            monitoring_processes: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Close the session. `end_time` is only ever set once.
    pub fn finish(&mut self, at: DateTime<Utc>, status: SessionStatus) -> bool {
        match self.status.transition(status) {
            Some(next) if self.end_time.is_none() => {
                self.status = next;
                self.end_time = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Elapsed milliseconds between start and end, 0 while still open.
    pub fn duration_ms(&self) -> u64 {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}
