//! Session summary and compliance scoring.
//!
//! Everything here is a pure function of the session's final state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::resources::ProcessKind;
use super::session::ProctoringSession;
use super::termination::BackupStatus;
use super::violations::{ViolationLog, ViolationType};

const BASE_SCORE: i32 = 100;

const NETWORK_STABILITY_THRESHOLD: f64 = 90.0;
const NETWORK_PENALTY: i32 = 10;
const RESPONSE_TIME_THRESHOLD_MS: f64 = 1000.0;
const RESPONSE_TIME_PENALTY: i32 = 15;
const VIOLATION_THRESHOLD: usize = 5;
const VIOLATION_PENALTY: i32 = 20;

const COOKIES_PENALTY: i32 = 10;
const SCRIPTING_PENALTY: i32 = 20;
const UNKNOWN_BROWSER_PENALTY: i32 = 15;

/// Time deducted from full-screen compliance per full-screen exit.
const FULLSCREEN_EXIT_PENALTY_MS: f64 = 30_000.0;
/// Time deducted from focus retention per tab switch or window blur.
const FOCUS_LOSS_PENALTY_MS: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPerformance {
    pub average_response_time: f64,
    pub network_stability: f64,
    pub device_compatibility: u32,
    pub overall_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegrity {
    pub records_collected: usize,
    pub data_loss_percentage: f64,
    pub backup_status: BackupStatus,
    pub checksum_verification: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceMetrics {
    pub full_screen_maintained: f64,
    pub camera_active_time: f64,
    pub microphone_active_time: f64,
    pub focus_retention_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Milliseconds between start and end
    pub total_duration: u64,
    pub violation_count: usize,
    pub violations_by_type: BTreeMap<ViolationType, usize>,
    pub system_performance: SystemPerformance,
    pub data_integrity: DataIntegrity,
    pub compliance_metrics: ComplianceMetrics,
}

impl SessionSummary {
    /// All-zero summary for sessions that could not be summarized.
    pub fn empty() -> Self {
        Self {
            total_duration: 0,
            violation_count: 0,
            violations_by_type: BTreeMap::new(),
            system_performance: SystemPerformance {
                average_response_time: 0.0,
                network_stability: 0.0,
                device_compatibility: 0,
                overall_score: 0,
            },
            data_integrity: DataIntegrity {
                records_collected: 0,
                data_loss_percentage: 100.0,
                backup_status: BackupStatus::Failed,
                checksum_verification: false,
            },
            compliance_metrics: ComplianceMetrics {
                full_screen_maintained: 0.0,
                camera_active_time: 0.0,
                microphone_active_time: 0.0,
                focus_retention_rate: 0.0,
            },
        }
    }

    /// Reflect the persistence outcome in the data-integrity block.
    pub fn with_backup_outcome(mut self, status: BackupStatus) -> Self {
        self.data_integrity.backup_status = status;
        self.data_integrity.checksum_verification = status != BackupStatus::Failed;
        self.data_integrity.data_loss_percentage = match status {
            BackupStatus::Success | BackupStatus::Partial => 0.0,
            BackupStatus::Failed => 100.0,
        };
        self
    }
}

/// Summarize a terminated session.
///
/// The data-integrity block assumes the record about to be written is saved;
/// callers adjust it with [`SessionSummary::with_backup_outcome`].
pub fn compute_summary(session: &ProctoringSession) -> SessionSummary {
    let duration = session.duration_ms();
    let violation_count = session.violations.len();

    let mut violations_by_type = BTreeMap::new();
    for violation in &session.violations {
        *violations_by_type.entry(violation.violation_type).or_insert(0) += 1;
    }

    let performance = &session.system_metrics.performance;
    let webcam_present = session
        .monitoring_processes
        .iter()
        .any(|p| p.kind == ProcessKind::Webcam);
    let capture_presence = if webcam_present && duration > 0 { 100.0 } else { 0.0 };

    SessionSummary {
        total_duration: duration,
        violation_count,
        violations_by_type,
        system_performance: SystemPerformance {
            average_response_time: performance.response_time_ms,
            network_stability: performance.network_stability,
            device_compatibility: device_compatibility(session),
            overall_score: overall_score(
                performance.network_stability,
                performance.response_time_ms,
                violation_count,
            ),
        },
        data_integrity: DataIntegrity {
            records_collected: violation_count + session.monitoring_processes.len(),
            data_loss_percentage: 0.0,
            backup_status: BackupStatus::Success,
            checksum_verification: true,
        },
        compliance_metrics: ComplianceMetrics {
            full_screen_maintained: retention_rate(
                duration,
                ViolationLog::count_of(session, &[ViolationType::FullscreenExit]),
                FULLSCREEN_EXIT_PENALTY_MS,
            ),
            camera_active_time: capture_presence,
            microphone_active_time: capture_presence,
            focus_retention_rate: retention_rate(
                duration,
                ViolationLog::count_of(
                    session,
                    &[ViolationType::TabSwitch, ViolationType::WindowBlur],
                ),
                FOCUS_LOSS_PENALTY_MS,
            ),
        },
    }
}

pub fn overall_score(network_stability: f64, response_time_ms: f64, violations: usize) -> u32 {
    let mut score = BASE_SCORE;
    if network_stability < NETWORK_STABILITY_THRESHOLD {
        score -= NETWORK_PENALTY;
    }
    if response_time_ms > RESPONSE_TIME_THRESHOLD_MS {
        score -= RESPONSE_TIME_PENALTY;
    }
    if violations > VIOLATION_THRESHOLD {
        score -= VIOLATION_PENALTY;
    }
    score.max(0) as u32
}

fn device_compatibility(session: &ProctoringSession) -> u32 {
    let metrics = &session.system_metrics;
    let mut score = BASE_SCORE;
    if !metrics.device.cookies_enabled {
        score -= COOKIES_PENALTY;
    }
    if !metrics.device.scripting_enabled {
        score -= SCRIPTING_PENALTY;
    }
    if !metrics.browser.is_resolved() {
        score -= UNKNOWN_BROWSER_PENALTY;
    }
    score.max(0) as u32
}

/// Percentage of the session left after deducting a fixed penalty per event.
fn retention_rate(duration_ms: u64, events: usize, penalty_ms: f64) -> f64 {
    if duration_ms == 0 {
        return 0.0;
    }
    let duration = duration_ms as f64;
    ((duration - events as f64 * penalty_ms) / duration * 100.0).max(0.0)
}
