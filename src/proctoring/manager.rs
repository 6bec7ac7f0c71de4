use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;

use super::clock::{Clock, SystemClock};
use super::host::{NotificationLevel, SessionHost};
use super::lockdown::LockdownController;
use super::registry::{ActiveSession, SessionRegistry, TerminationCallback};
use super::resources::{
    self, CaptureStream, MonitoringProcess, ProcessKind, ProcessStatus,
};
use super::session::ProctoringSession;
use super::summary::{compute_summary, SessionSummary};
use super::termination::{
    BackupStatus, CleanupStatus, RecoveryCause, StepLog, TerminationKind, TerminationMetadata,
    TerminationResult,
};
use super::violations::{Severity, ViolationEvent, ViolationLog, ViolationType};
use crate::error::{ProctorError, Result};
use crate::storage::{backup_key, BackupStore, EmergencyBackup, SessionRecord, StorageGateway};

const MEDIA_WARNING: &str = "Some media streams may still be active";
const LOCKDOWN_WARNING: &str = "Some browser restrictions may still be active";
const STORAGE_WARNING: &str = "Some temporary data may remain";

/// Longest accepted session id, in bytes. Keeps backup file names under the
/// common 255 byte limit once hex encoded.
pub const MAX_SESSION_ID_LEN: usize = 100;

/// Owns the lifecycle of every proctoring session in the process.
pub struct ProctorManager {
    registry: Arc<SessionRegistry>,
    storage: Arc<dyn StorageGateway>,
    backup: Arc<dyn BackupStore>,
    clock: Arc<dyn Clock>,
}

impl ProctorManager {
    pub fn new(storage: Arc<dyn StorageGateway>, backup: Arc<dyn BackupStore>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            storage,
            backup,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn session(&self, session_id: &str) -> Option<ProctoringSession> {
        self.registry.get_session(session_id).await
    }

    pub async fn is_active(&self, session_id: &str) -> bool {
        self.session(session_id)
            .await
            .map(|s| s.is_active())
            .unwrap_or(false)
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.active_count().await
    }

    /// Whether the durable store is currently reachable.
    pub async fn storage_available(&self) -> bool {
        match self.storage.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::warn!(error = %e, "Storage health check failed");
                false
            }
        }
    }

    /// Start monitoring a new exam session on `host`.
    pub async fn initialize(
        &self,
        student_id: &str,
        quiz_id: &str,
        session_id: &str,
        host: SessionHost,
    ) -> Result<ProctoringSession> {
        validate_session_id(session_id)?;
        if self.registry.contains(session_id).await {
            return Err(ProctorError::SessionAlreadyExists(session_id.to_string()));
        }

        let metrics = host.probe.snapshot().await;
        let session =
            ProctoringSession::new(student_id, quiz_id, session_id, self.clock.now(), metrics);
        let lockdown = Arc::new(LockdownController::new(host.lockdown.clone()));

        self.registry
            .insert(ActiveSession {
                session: session.clone(),
                host,
                lockdown,
            })
            .await?;

        tracing::info!(
            session_id = %session_id,
            student_id = %student_id,
            quiz_id = %quiz_id,
            "Proctoring session initialized"
        );
        Ok(session)
    }

    pub async fn engage_lockdown(&self, session_id: &str) -> Result<()> {
        let entry = self.active_entry(session_id).await?;
        entry.lockdown.engage().await
    }

    pub async fn register_stream(&self, session_id: &str, stream: CaptureStream) -> Result<()> {
        self.registry
            .with_session_mut(session_id, |entry| {
                ensure_active(&entry.session)?;
                resources::register_stream(&mut entry.session, stream);
                Ok(())
            })
            .await
    }

    pub async fn register_process(
        &self,
        session_id: &str,
        kind: ProcessKind,
    ) -> Result<MonitoringProcess> {
        let now = self.clock.now();
        self.registry
            .with_session_mut(session_id, |entry| {
                ensure_active(&entry.session)?;
                Ok(resources::register_process(&mut entry.session, kind, now))
            })
            .await
    }

    pub async fn update_process(
        &self,
        session_id: &str,
        kind: ProcessKind,
        status: ProcessStatus,
    ) -> Result<()> {
        let now = self.clock.now();
        self.registry
            .with_session_mut(session_id, |entry| {
                resources::update_process(&mut entry.session, kind, status, now)
            })
            .await
    }

    pub async fn record_violation(
        &self,
        session_id: &str,
        violation_type: ViolationType,
        severity: Severity,
        description: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<ViolationEvent> {
        let now = self.clock.now();
        self.registry
            .with_session_mut(session_id, |entry| {
                ViolationLog::append(
                    &mut entry.session,
                    violation_type,
                    severity,
                    description,
                    metadata,
                    now,
                )
            })
            .await
    }

    /// Register a hook run once during the session's termination.
    pub async fn register_termination_callback(
        &self,
        session_id: &str,
        callback: TerminationCallback,
    ) -> Result<()> {
        self.active_entry(session_id).await?;
        self.registry.register_callback(session_id, callback).await;
        Ok(())
    }

    pub async fn terminate(
        &self,
        student_id: &str,
        quiz_id: &str,
        session_id: &str,
    ) -> TerminationResult {
        self.terminate_with(student_id, quiz_id, session_id, TerminationKind::Normal)
            .await
    }

    /// Tear a session down. Never fails: every outcome, including a panic in
    /// host code, is reported through the returned result.
    pub async fn terminate_with(
        &self,
        student_id: &str,
        quiz_id: &str,
        session_id: &str,
        kind: TerminationKind,
    ) -> TerminationResult {
        tracing::info!(
            session_id = %session_id,
            termination_type = ?kind,
            "Terminating proctoring session"
        );

        let outcome = guarded(self.run_termination(student_id, quiz_id, session_id, kind)).await;

        match outcome {
            Ok(result) => {
                tracing::info!(
                    session_id = %session_id,
                    success = result.success,
                    errors = result.errors.len(),
                    warnings = result.warnings.len(),
                    "Termination finished"
                );
                result
            }
            Err(message) => {
                tracing::error!(
                    session_id = %session_id,
                    panic = %message,
                    "Critical failure during termination"
                );
                let entry = self.registry.get_entry(session_id).await;
                let actions = self
                    .recover(session_id, RecoveryCause::CriticalError, entry.as_ref())
                    .await;
                TerminationResult::failed(
                    session_id,
                    self.clock.now(),
                    format!("Critical termination failure: {}", message),
                    actions,
                )
            }
        }
    }

    async fn run_termination(
        &self,
        student_id: &str,
        quiz_id: &str,
        session_id: &str,
        kind: TerminationKind,
    ) -> TerminationResult {
        let now = self.clock.now();

        let Some(mut entry) = self.registry.begin_termination(session_id, now).await else {
            return self.not_found(session_id, now).await;
        };

        let mut log = StepLog::default();
        if entry.session.student_id != student_id || entry.session.quiz_id != quiz_id {
            log.warn(format!(
                "Termination requested as {}/{} for a session owned by {}/{}",
                student_id, quiz_id, entry.session.student_id, entry.session.quiz_id
            ));
        }

        log.record(
            session_id,
            "media release",
            resources::release_streams(&entry.session.media_streams),
            Some(MEDIA_WARNING),
        );

        log.record(
            session_id,
            "lockdown removal",
            entry.lockdown.disengage().await,
            Some(LOCKDOWN_WARNING),
        );

        let stopped = self.stop_monitoring(&mut entry.session, now).await;
        log.record(session_id, "monitoring stop", stopped, None);

        let summary = compute_summary(&entry.session);

        let backup_status = self.persist(&entry.session, &summary, &mut log).await;
        let summary = summary.with_backup_outcome(backup_status);

        let cleared = log.record(
            session_id,
            "storage cleanup",
            clear_ephemeral(&entry.host, session_id).await,
            Some(STORAGE_WARNING),
        );
        let cleanup_status = if cleared.is_some() {
            CleanupStatus::Complete
        } else {
            CleanupStatus::Partial
        };

        self.registry.remove(session_id).await;

        let mut termination_type = kind;
        let mut recovery_actions = Vec::new();
        if !log.is_clean() {
            termination_type = TerminationKind::Error;
            recovery_actions = self
                .recover(session_id, RecoveryCause::IncompleteTermination, Some(&entry))
                .await;
        }

        notify_outcome(&entry.host, &summary);

        TerminationResult {
            success: log.is_clean(),
            session_id: session_id.to_string(),
            termination_time: now,
            summary,
            errors: log.errors,
            warnings: log.warnings,
            metadata: TerminationMetadata {
                termination_type,
                data_backup_status: backup_status,
                cleanup_status,
                recovery_actions,
            },
        }
    }

    async fn not_found(&self, session_id: &str, now: DateTime<Utc>) -> TerminationResult {
        tracing::warn!(session_id = %session_id, "Termination requested for unknown session");

        // A concurrent termination still owns the entry; leave it alone.
        let actions = if self.registry.contains(session_id).await {
            vec![format!("Termination of session {} already in progress", session_id)]
        } else {
            self.recover(session_id, RecoveryCause::CriticalError, None)
                .await
        };

        TerminationResult::failed(
            session_id,
            now,
            ProctorError::SessionNotFound(session_id.to_string()).to_string(),
            actions,
        )
    }

    async fn stop_monitoring(
        &self,
        session: &mut ProctoringSession,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let stopped = resources::stop_processes(&mut session.monitoring_processes, now);

        let mut failures = Vec::new();
        for callback in self.registry.take_callbacks(&session.session_id).await {
            if let Err(e) = callback() {
                tracing::warn!(session_id = %session.session_id, error = %e, "Termination callback failed");
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(stopped)
        } else {
            Err(ProctorError::CallbackFailed(failures.join("; ")))
        }
    }

    /// Durable save first, local emergency copy as fallback.
    async fn persist(
        &self,
        session: &ProctoringSession,
        summary: &SessionSummary,
        log: &mut StepLog,
    ) -> BackupStatus {
        let durable = match SessionRecord::new(session, summary, self.clock.now()) {
            Ok(record) => self.storage.save(&record).await,
            Err(e) => Err(e),
        };

        let save_error = match durable {
            Ok(()) => return BackupStatus::Success,
            Err(e) => e,
        };
        tracing::error!(
            session_id = %session.session_id,
            error = %save_error,
            "Durable save failed, writing emergency backup"
        );

        let payload = EmergencyBackup::new(session, summary, self.clock.now());
        match self
            .backup
            .local_save(&backup_key(&session.session_id), &payload)
            .await
        {
            Ok(()) => {
                log.warn(format!(
                    "Session data saved locally only ({})",
                    save_error
                ));
                BackupStatus::Partial
            }
            Err(backup_error) => {
                log.error(format!("data save: {}", save_error));
                log.error(format!("emergency backup: {}", backup_error));
                BackupStatus::Failed
            }
        }
    }

    /// Best-effort cleanup after a failed or aborted termination. Returns one
    /// description per action taken.
    pub async fn recover(
        &self,
        session_id: &str,
        cause: RecoveryCause,
        known: Option<&ActiveSession>,
    ) -> Vec<String> {
        tracing::warn!(session_id = %session_id, cause = ?cause, "Running termination recovery");
        let mut actions = Vec::new();

        if let Some(entry) = known {
            let streams = &entry.session.media_streams;
            let live = resources::live_track_count(streams);
            if live > 0 {
                actions.push(
                    match guarded(async { resources::release_streams(streams) }).await {
                        Ok(Ok(stopped)) => format!("Force-stopped {} remaining media tracks", stopped),
                        Ok(Err(e)) => format!("Media release retry failed: {}", e),
                        Err(panic) => format!("Media release retry aborted: {}", panic),
                    },
                );
            }

            match guarded(entry.lockdown.disengage()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(lifted)) => {
                    actions.push(format!("Lifted {} remaining browser restrictions", lifted))
                }
                Ok(Err(e)) => actions.push(format!("Lockdown release retry failed: {}", e)),
                Err(panic) => actions.push(format!("Lockdown release retry aborted: {}", panic)),
            }

            for store in &entry.host.ephemeral {
                match guarded(store.clear_session(session_id)).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(removed)) => actions.push(format!(
                        "Cleared {} leftover entries from {:?} storage",
                        removed,
                        store.scope()
                    )),
                    Ok(Err(e)) => actions.push(format!(
                        "Retry of {:?} storage cleanup failed: {}",
                        store.scope(),
                        e
                    )),
                    Err(panic) => actions.push(format!(
                        "Retry of {:?} storage cleanup aborted: {}",
                        store.scope(),
                        panic
                    )),
                }
            }
        }

        let discarded = self.registry.take_callbacks(session_id).await.len();
        if discarded > 0 {
            actions.push(format!("Discarded {} pending termination callbacks", discarded));
        }

        if self.registry.remove(session_id).await.is_some() {
            actions.push(format!("Removed session {} from active registry", session_id));
        }

        if actions.is_empty() {
            actions.push(format!("No residual state found for session {}", session_id));
        }
        actions
    }

    async fn active_entry(&self, session_id: &str) -> Result<ActiveSession> {
        let entry = self
            .registry
            .get_entry(session_id)
            .await
            .ok_or_else(|| ProctorError::SessionNotFound(session_id.to_string()))?;
        ensure_active(&entry.session)?;
        Ok(entry)
    }
}

/// Session ids name durable documents and URL path segments.
fn validate_session_id(session_id: &str) -> Result<()> {
    let problem = if session_id.trim().is_empty() {
        "must not be blank"
    } else if session_id.len() > MAX_SESSION_ID_LEN {
        "is too long"
    } else if session_id == "." || session_id == ".." {
        "is a reserved path segment"
    } else if session_id.chars().any(char::is_control) {
        "contains control characters"
    } else {
        return Ok(());
    };
    Err(ProctorError::InvalidSessionId(format!(
        "{:?} {}",
        session_id, problem
    )))
}

fn ensure_active(session: &ProctoringSession) -> Result<()> {
    if session.is_active() {
        Ok(())
    } else {
        Err(ProctorError::SessionNotActive(session.session_id.clone()))
    }
}

async fn clear_ephemeral(host: &SessionHost, session_id: &str) -> Result<usize> {
    let mut removed = 0;
    let mut failures = Vec::new();

    for store in &host.ephemeral {
        match store.clear_session(session_id).await {
            Ok(n) => removed += n,
            Err(e) => {
                tracing::warn!(scope = ?store.scope(), error = %e, "Failed to clear session storage");
                failures.push(format!("{:?}: {}", store.scope(), e));
            }
        }
    }

    if failures.is_empty() {
        Ok(removed)
    } else {
        Err(ProctorError::EphemeralClearFailed(failures.join("; ")))
    }
}

fn notify_outcome(host: &SessionHost, summary: &SessionSummary) {
    host.notifier.notify(
        NotificationLevel::Success,
        "Proctoring session ended successfully",
    );
    if summary.violation_count > 0 {
        host.notifier.notify(
            NotificationLevel::Info,
            &format!(
                "{} violation(s) were recorded during this session",
                summary.violation_count
            ),
        );
    }
}

/// Poll `fut`, turning a panic into its message.
async fn guarded<F: Future>(fut: F) -> std::result::Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(panic.as_ref()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proctoring::clock::ManualClock;
    use crate::proctoring::host::StorageScope;
    use crate::proctoring::lockdown::Restriction;
    use crate::proctoring::memory::{
        capture_stream, MemoryEphemeralStore, MemoryLockdownHost, MemoryTrack, RecordingNotifier,
    };
    use crate::proctoring::probe::ReportedProbe;
    use crate::proctoring::resources::TrackKind;
    use crate::proctoring::state::SessionStatus;
    use crate::storage::{MemoryBackupStore, MemoryDocumentStore};

    struct Fixture {
        manager: ProctorManager,
        documents: Arc<MemoryDocumentStore>,
        backups: Arc<MemoryBackupStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let documents = Arc::new(MemoryDocumentStore::default());
        let backups = Arc::new(MemoryBackupStore::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = ProctorManager::new(documents.clone(), backups.clone())
            .with_clock(clock.clone());
        Fixture {
            manager,
            documents,
            backups,
            clock,
        }
    }

    fn detached() -> SessionHost {
        SessionHost::detached(Arc::new(ReportedProbe::default()))
    }

    #[tokio::test]
    async fn test_initialize_rejects_duplicate() {
        let f = fixture();
        f.manager.initialize("S1", "X1", "Q1", detached()).await.unwrap();

        let err = f
            .manager
            .initialize("S1", "X1", "Q1", detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ProctorError::SessionAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_initialize_rejects_unstorable_ids() {
        let f = fixture();
        let too_long = "q".repeat(MAX_SESSION_ID_LEN + 1);

        for id in ["", "   ", ".", "..", "exam\n1", too_long.as_str()] {
            let err = f.manager.initialize("S1", "X1", id, detached()).await.unwrap_err();
            assert!(matches!(err, ProctorError::InvalidSessionId(_)), "{:?}", id);
        }
        assert_eq!(f.manager.active_sessions().await, 0);

        f.manager.initialize("S1", "X1", "exam/1", detached()).await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_availability_follows_store() {
        let f = fixture();
        assert!(f.manager.storage_available().await);
        f.documents.set_failing(true);
        assert!(!f.manager.storage_available().await);
    }

    #[tokio::test]
    async fn test_terminate_clean_session() {
        let f = fixture();
        f.manager.initialize("S1", "X1", "Q1", detached()).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(90));

        let result = f.manager.terminate("S1", "X1", "Q1").await;

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.summary.total_duration, 90_000);
        assert_eq!(result.metadata.termination_type, TerminationKind::Normal);
        assert_eq!(result.metadata.data_backup_status, BackupStatus::Success);
        assert_eq!(result.metadata.cleanup_status, CleanupStatus::Complete);
        assert!(result.metadata.recovery_actions.is_empty());
        assert_eq!(f.documents.len().await, 1);
        assert!(!f.manager.registry().contains("Q1").await);
    }

    #[tokio::test]
    async fn test_violation_after_termination_rejected() {
        let f = fixture();
        f.manager.initialize("S1", "X1", "Q1", detached()).await.unwrap();
        f.manager.terminate("S1", "X1", "Q1").await;

        let err = f
            .manager
            .record_violation("Q1", ViolationType::TabSwitch, Severity::Medium, "late", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProctorError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_forced_kind_preserved_when_clean() {
        let f = fixture();
        f.manager.initialize("S1", "X1", "Q1", detached()).await.unwrap();

        let result = f
            .manager
            .terminate_with("S1", "X1", "Q1", TerminationKind::Forced)
            .await;
        assert_eq!(result.metadata.termination_type, TerminationKind::Forced);
    }

    #[tokio::test]
    async fn test_lockdown_failure_is_isolated() {
        let f = fixture();
        let lockdown = Arc::new(MemoryLockdownHost::failing_lift(Restriction::Clipboard));
        let host = SessionHost {
            lockdown: lockdown.clone(),
            ..detached()
        };
        f.manager.initialize("S1", "X1", "Q1", host).await.unwrap();
        f.manager.engage_lockdown("Q1").await.unwrap();

        let result = f.manager.terminate("S1", "X1", "Q1").await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("lockdown removal:"));
        assert!(result.warnings.contains(&LOCKDOWN_WARNING.to_string()));
        assert_eq!(result.metadata.termination_type, TerminationKind::Error);
        assert_eq!(result.metadata.data_backup_status, BackupStatus::Success);
        assert!(!result.metadata.recovery_actions.is_empty());
        assert_eq!(lockdown.active(), vec![Restriction::Clipboard]);
    }

    #[tokio::test]
    async fn test_callbacks_run_once_and_failures_recorded() {
        let f = fixture();
        f.manager.initialize("S1", "X1", "Q1", detached()).await.unwrap();
        f.manager
            .register_termination_callback("Q1", Box::new(|| Ok(())))
            .await
            .unwrap();
        f.manager
            .register_termination_callback(
                "Q1",
                Box::new(|| Err(ProctorError::internal("timer still armed"))),
            )
            .await
            .unwrap();

        let result = f.manager.terminate("S1", "X1", "Q1").await;

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("timer still armed"));
        assert!(result.warnings.is_empty());
        assert_eq!(f.manager.registry().callback_count("Q1").await, 0);
    }

    #[tokio::test]
    async fn test_storage_cleanup_failure_marks_partial() {
        let f = fixture();
        let local = MemoryEphemeralStore::new(StorageScope::Local);
        local.insert("quiz_Q1_answers", "{}");
        local.set_failing(true);
        let host = SessionHost {
            ephemeral: vec![local.clone()],
            ..detached()
        };
        f.manager.initialize("S1", "X1", "Q1", host).await.unwrap();

        let result = f.manager.terminate("S1", "X1", "Q1").await;

        assert_eq!(result.metadata.cleanup_status, CleanupStatus::Partial);
        assert!(result.warnings.contains(&STORAGE_WARNING.to_string()));
        assert_eq!(local.keys(), vec!["quiz_Q1_answers".to_string()]);
    }

    #[tokio::test]
    async fn test_panicking_track_takes_critical_path() {
        let f = fixture();
        let notifier = Arc::new(RecordingNotifier::default());
        let host = SessionHost {
            notifier: notifier.clone(),
            ..detached()
        };
        f.manager.initialize("S1", "X1", "Q1", host).await.unwrap();
        let track = MemoryTrack::panicking("v1", TrackKind::Video);
        f.manager
            .register_stream("Q1", capture_stream("cam", &[track]))
            .await
            .unwrap();

        let result = f.manager.terminate("S1", "X1", "Q1").await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Critical termination failure"));
        assert_eq!(result.summary.total_duration, 0);
        assert_eq!(result.metadata.termination_type, TerminationKind::Error);
        assert_eq!(result.metadata.cleanup_status, CleanupStatus::Failed);
        assert!(result
            .metadata
            .recovery_actions
            .iter()
            .any(|a| a.contains("Removed session Q1")));
        assert!(!f.manager.registry().contains("Q1").await);
        assert!(notifier.sent().is_empty());
        assert_eq!(f.backups.len().await, 0);
    }

    #[tokio::test]
    async fn test_session_status_visible_while_active() {
        let f = fixture();
        f.manager.initialize("S1", "X1", "Q1", detached()).await.unwrap();
        assert!(f.manager.is_active("Q1").await);
        assert_eq!(
            f.manager.session("Q1").await.unwrap().status,
            SessionStatus::Active
        );
        assert_eq!(f.manager.active_sessions().await, 1);
    }
}
