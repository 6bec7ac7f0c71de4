use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::host::SessionHost;
use super::lockdown::LockdownController;
use super::session::ProctoringSession;
use super::state::SessionStatus;
use crate::error::{ProctorError, Result};

/// Cleanup hook invoked once, right before a session is torn down.
pub type TerminationCallback = Box<dyn FnOnce() -> Result<()> + Send + Sync>;

/// A registered session together with the host it runs on.
#[derive(Clone)]
pub struct ActiveSession {
    pub session: ProctoringSession,
    pub host: SessionHost,
    pub lockdown: Arc<LockdownController>,
}

/// Active sessions and pending termination callbacks, keyed by session id.
///
/// Each map sits behind its own lock so terminations of different sessions
/// never race on shared state.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ActiveSession>>,
    callbacks: RwLock<HashMap<String, Vec<TerminationCallback>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, entry: ActiveSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session_id = entry.session.session_id.clone();

        if sessions.contains_key(&session_id) {
            return Err(ProctorError::SessionAlreadyExists(session_id));
        }

        sessions.insert(session_id, entry);
        Ok(())
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<ProctoringSession> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Run `f` against a registered session under the write lock.
    pub async fn with_session_mut<T, F>(&self, session_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ActiveSession) -> Result<T>,
    {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| ProctorError::SessionNotFound(session_id.to_string()))?;
        f(entry)
    }

    pub async fn get_entry(&self, session_id: &str) -> Option<ActiveSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Close an active session and hand back a copy for teardown.
    ///
    /// Lookup and the status change happen under one write lock, so only
    /// one caller can win; later or concurrent callers get `None`.
    pub async fn begin_termination(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Option<ActiveSession> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(session_id)?;

        if !entry.session.finish(at, SessionStatus::Completed) {
            return None;
        }
        Some(entry.clone())
    }

    pub async fn remove(&self, session_id: &str) -> Option<ActiveSession> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn register_callback(&self, session_id: &str, callback: TerminationCallback) {
        self.callbacks
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(callback);
    }

    pub async fn take_callbacks(&self, session_id: &str) -> Vec<TerminationCallback> {
        self.callbacks
            .write()
            .await
            .remove(session_id)
            .unwrap_or_default()
    }

    pub async fn callback_count(&self, session_id: &str) -> usize {
        self.callbacks
            .read()
            .await
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
