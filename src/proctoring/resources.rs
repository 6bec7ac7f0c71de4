//! Hardware capture streams and auxiliary monitoring processes.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::ProctoringSession;
use crate::error::{ProctorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Live,
    Ended,
}

/// One live capture track (camera or microphone) owned by a session.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn state(&self) -> TrackState;

    /// Stop capturing. Must leave the track `Ended` on success.
    fn stop(&self) -> Result<()>;
}

/// A group of capture tracks acquired together.
#[derive(Clone)]
pub struct CaptureStream {
    pub id: String,
    pub tracks: Vec<Arc<dyn MediaTrack>>,
}

impl CaptureStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.state() == TrackState::Live)
            .count()
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }
}

impl fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracks: Vec<(&str, TrackKind, TrackState)> = self
            .tracks
            .iter()
            .map(|t| (t.id(), t.kind(), t.state()))
            .collect();
        f.debug_struct("CaptureStream")
            .field("id", &self.id)
            .field("tracks", &tracks)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Webcam,
    ScreenShare,
    Keyboard,
    Mouse,
    Network,
    BrowserLock,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Webcam => "webcam",
            ProcessKind::ScreenShare => "screen_share",
            ProcessKind::Keyboard => "keyboard",
            ProcessKind::Mouse => "mouse",
            ProcessKind::Network => "network",
            ProcessKind::BrowserLock => "browser_lock",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Active,
    Stopped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringProcess {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ProcessKind,
    pub status: ProcessStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Attach a newly acquired capture stream to a session.
pub fn register_stream(session: &mut ProctoringSession, stream: CaptureStream) {
    tracing::info!(
        session_id = %session.session_id,
        stream_id = %stream.id,
        tracks = stream.tracks.len(),
        "Registered capture stream"
    );
    session.media_streams.push(stream);
}

/// Stop every live track of every stream.
///
/// Tracks that already ended are skipped, so calling this twice is harmless.
/// Every track is attempted even when an earlier one fails; failures are
/// reported as a single error. Returns the number of tracks stopped.
pub fn release_streams(streams: &[CaptureStream]) -> Result<usize> {
    let mut stopped = 0;
    let mut failures = Vec::new();

    for stream in streams {
        for track in &stream.tracks {
            if track.state() == TrackState::Ended {
                continue;
            }
            match track.stop() {
                Ok(()) => stopped += 1,
                Err(e) => {
                    tracing::error!(
                        stream_id = %stream.id,
                        track_id = %track.id(),
                        error = %e,
                        "Failed to stop capture track"
                    );
                    failures.push(format!("{}: {}", track.id(), e));
                }
            }
        }
    }

    if failures.is_empty() {
        Ok(stopped)
    } else {
        Err(ProctorError::MediaReleaseFailed(failures.join("; ")))
    }
}

/// Count tracks that are still capturing.
pub fn live_track_count(streams: &[CaptureStream]) -> usize {
    streams.iter().map(CaptureStream::live_tracks).sum()
}

/// Start tracking a monitoring process. An existing entry of the same kind is
/// reactivated instead of duplicated.
pub fn register_process(
    session: &mut ProctoringSession,
    kind: ProcessKind,
    now: DateTime<Utc>,
) -> MonitoringProcess {
    if let Some(existing) = session
        .monitoring_processes
        .iter_mut()
        .find(|p| p.kind == kind)
    {
        existing.status = ProcessStatus::Active;
        existing.end_time = None;
        return existing.clone();
    }

    let process = MonitoringProcess {
        id: format!("{}_{}", session.session_id, kind.as_str()),
        kind,
        status: ProcessStatus::Active,
        start_time: now,
        end_time: None,
    };
    session.monitoring_processes.push(process.clone());
    process
}

/// Update the status of a tracked process.
pub fn update_process(
    session: &mut ProctoringSession,
    kind: ProcessKind,
    status: ProcessStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let process = session
        .monitoring_processes
        .iter_mut()
        .find(|p| p.kind == kind)
        .ok_or_else(|| ProctorError::ProcessNotRegistered(kind.as_str().to_string()))?;

    process.status = status;
    if status != ProcessStatus::Active {
        process.end_time = Some(now);
    }
    Ok(())
}

/// Mark every monitoring process stopped.
pub fn stop_processes(processes: &mut [MonitoringProcess], now: DateTime<Utc>) -> usize {
    for process in processes.iter_mut() {
        process.status = ProcessStatus::Stopped;
        process.end_time = Some(now);
    }
    processes.len()
}
