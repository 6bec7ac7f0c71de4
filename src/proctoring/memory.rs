//! In-process implementations of the host collaborators.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::host::{EphemeralStore, NotificationLevel, Notifier, StorageScope};
use super::lockdown::{LockdownHost, Restriction};
use super::resources::{CaptureStream, MediaTrack, TrackKind, TrackState};
use crate::error::{ProctorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopBehavior {
    Succeed,
    Fail,
    Panic,
}

/// Capture track whose stop behaviour can be scripted.
#[derive(Debug)]
pub struct MemoryTrack {
    id: String,
    kind: TrackKind,
    ended: AtomicBool,
    stop_calls: AtomicUsize,
    behavior: StopBehavior,
}

impl MemoryTrack {
    fn with_behavior(id: &str, kind: TrackKind, behavior: StopBehavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            ended: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            behavior,
        })
    }

    pub fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Self::with_behavior(id, kind, StopBehavior::Succeed)
    }

    /// A track whose `stop` always returns an error.
    pub fn failing(id: &str, kind: TrackKind) -> Arc<Self> {
        Self::with_behavior(id, kind, StopBehavior::Fail)
    }

    /// A track whose `stop` panics.
    pub fn panicking(id: &str, kind: TrackKind) -> Arc<Self> {
        Self::with_behavior(id, kind, StopBehavior::Panic)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MemoryTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn state(&self) -> TrackState {
        if self.ended.load(Ordering::SeqCst) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            StopBehavior::Succeed => {
                self.ended.store(true, Ordering::SeqCst);
                Ok(())
            }
            StopBehavior::Fail => Err(ProctorError::internal(format!(
                "track {} refused to stop",
                self.id
            ))),
            StopBehavior::Panic => panic!("capture device for track {} disappeared", self.id),
        }
    }
}

/// Build a capture stream from in-memory tracks.
pub fn capture_stream(id: &str, tracks: &[Arc<MemoryTrack>]) -> CaptureStream {
    CaptureStream::new(
        id,
        tracks
            .iter()
            .map(|t| t.clone() as Arc<dyn MediaTrack>)
            .collect(),
    )
}

/// Lockdown surface that tracks active restrictions in memory.
#[derive(Debug, Default)]
pub struct MemoryLockdownHost {
    active: Mutex<BTreeSet<Restriction>>,
    lift_calls: AtomicUsize,
    failing_lift: Option<Restriction>,
}

impl MemoryLockdownHost {
    /// A host that refuses to lift one restriction.
    pub fn failing_lift(restriction: Restriction) -> Self {
        Self {
            failing_lift: Some(restriction),
            ..Self::default()
        }
    }

    pub fn active(&self) -> Vec<Restriction> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }

    pub fn lift_calls(&self) -> usize {
        self.lift_calls.load(Ordering::SeqCst)
    }
}

impl LockdownHost for MemoryLockdownHost {
    fn apply(&self, restriction: Restriction) -> Result<()> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(restriction);
        Ok(())
    }

    fn lift(&self, restriction: Restriction) -> Result<()> {
        self.lift_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_lift == Some(restriction) {
            return Err(ProctorError::internal(format!(
                "{:?} blocker could not be detached",
                restriction
            )));
        }
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&restriction);
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&Restriction::Fullscreen)
    }
}

/// Key/value store standing in for an on-device storage area.
#[derive(Debug)]
pub struct MemoryEphemeralStore {
    scope: StorageScope,
    entries: Mutex<HashMap<String, String>>,
    fail: AtomicBool,
}

impl MemoryEphemeralStore {
    pub fn new(scope: StorageScope) -> Arc<Self> {
        Arc::new(Self {
            scope,
            entries: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    fn scope(&self) -> StorageScope {
        self.scope
    }

    async fn clear_session(&self, session_id: &str) -> Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProctorError::EphemeralClearFailed(format!(
                "{:?} storage is locked",
                self.scope
            )));
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|key, _| !key_belongs_to(key, session_id));
        Ok(before - entries.len())
    }
}

/// True when `session_id` appears in `key` as a whole segment, bounded by
/// `_`, `:` or the ends of the key.
fn key_belongs_to(key: &str, session_id: &str) -> bool {
    if session_id.is_empty() {
        return false;
    }
    let is_boundary = |c: Option<char>| c.map_or(true, |c| c == '_' || c == ':');
    key.match_indices(session_id).any(|(start, _)| {
        let end = start + session_id.len();
        is_boundary(key[..start].chars().next_back()) && is_boundary(key[end..].chars().next())
    })
}

/// Notifier that keeps every notification for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationLevel, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(NotificationLevel, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}
