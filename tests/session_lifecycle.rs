// Lifecycle tests for the proctoring session manager
// Every collaborator is in-memory so each failure mode can be forced

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use chrono::{Duration, Utc};

use proctor_session::proctoring::memory::{
    capture_stream, MemoryEphemeralStore, MemoryLockdownHost, MemoryTrack, RecordingNotifier,
};
use proctor_session::proctoring::resources::{live_track_count, release_streams};
use proctor_session::proctoring::{
    BackupStatus, CleanupStatus, ClientReport, ManualClock, MediaTrack, NotificationLevel,
    ProcessKind, ProcessStatus, ProctorManager, ReportedProbe, SessionHost, SessionRegistry,
    Severity, StorageScope, TerminationKind, TrackKind, TrackState, ViolationType,
};
use proctor_session::storage::{
    backup_key, FileBackupStore, FileDocumentStore, MemoryBackupStore, MemoryDocumentStore,
};

struct Harness {
    manager: ProctorManager,
    documents: Arc<MemoryDocumentStore>,
    backups: Arc<MemoryBackupStore>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let documents = Arc::new(MemoryDocumentStore::default());
    let backups = Arc::new(MemoryBackupStore::default());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let manager =
        ProctorManager::new(documents.clone(), backups.clone()).with_clock(clock.clone());
    Harness {
        manager,
        documents,
        backups,
        clock,
    }
}

fn detached_host() -> SessionHost {
    SessionHost::detached(Arc::new(ReportedProbe::default()))
}

#[tokio::test]
async fn test_second_terminate_takes_not_found_path() {
    let h = harness();
    h.manager
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();

    let first = h.manager.terminate("student", "quiz", "S1").await;
    assert!(first.success);

    let second = h.manager.terminate("student", "quiz", "S1").await;
    assert!(!second.success);
    assert_eq!(second.errors.len(), 1);
    assert!(second.errors[0].contains("not found"));
    assert_eq!(second.summary.total_duration, 0);
    assert_eq!(second.summary.violation_count, 0);
    assert_eq!(second.metadata.termination_type, TerminationKind::Error);
    assert_eq!(second.metadata.data_backup_status, BackupStatus::Failed);
    assert_eq!(second.metadata.cleanup_status, CleanupStatus::Failed);
    assert!(!second.metadata.recovery_actions.is_empty());

    // Only the first termination persisted anything
    assert_eq!(h.documents.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_terminate_has_single_winner() {
    let h = harness();
    h.manager
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        h.manager.terminate("student", "quiz", "S1"),
        h.manager.terminate("student", "quiz", "S1")
    );

    assert_eq!([a.success, b.success].iter().filter(|s| **s).count(), 1);
    assert_eq!(h.documents.len().await, 1);
}

/// While one termination is still running, a second request for the same
/// session is turned away without disturbing the first.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_terminate_while_termination_running_reports_in_progress() {
    let h = harness();
    let manager = Arc::new(h.manager);
    manager
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();

    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let (callback_entered, callback_release) = (entered.clone(), release.clone());
    manager
        .register_termination_callback(
            "S1",
            Box::new(move || {
                callback_entered.wait();
                callback_release.wait();
                Ok(())
            }),
        )
        .await
        .unwrap();

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.terminate("student", "quiz", "S1").await }
    });
    tokio::task::spawn_blocking(move || {
        entered.wait();
    })
    .await
    .unwrap();

    let second = manager.terminate("student", "quiz", "S1").await;
    assert!(!second.success);
    assert!(second.errors[0].contains("not found"));
    assert_eq!(
        second.metadata.recovery_actions,
        vec!["Termination of session S1 already in progress".to_string()]
    );
    assert!(manager.registry().contains("S1").await);

    tokio::task::spawn_blocking(move || {
        release.wait();
    })
    .await
    .unwrap();
    let first = first.await.unwrap();

    assert!(first.success, "{:?}", first.errors);
    assert!(!manager.registry().contains("S1").await);
    assert_eq!(h.documents.len().await, 1);
}

/// Managers built over one registry see and terminate the same sessions.
#[tokio::test]
async fn test_managers_share_an_injected_registry() {
    let registry = SessionRegistry::new();
    let documents = Arc::new(MemoryDocumentStore::default());
    let front = ProctorManager::new(
        Arc::new(MemoryDocumentStore::default()),
        Arc::new(MemoryBackupStore::default()),
    )
    .with_registry(registry.clone());
    let back = ProctorManager::new(documents.clone(), Arc::new(MemoryBackupStore::default()))
        .with_registry(registry.clone());

    front
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();
    assert!(back.is_active("S1").await);
    assert!(back
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .is_err());

    let result = back.terminate("student", "quiz", "S1").await;
    assert!(result.success);
    assert!(documents.get("S1").await.is_some());
    assert_eq!(front.active_sessions().await, 0);
}

#[test]
fn test_stream_release_is_idempotent() {
    let video = MemoryTrack::new("v1", TrackKind::Video);
    let audio = MemoryTrack::new("a1", TrackKind::Audio);
    let streams = vec![capture_stream("camera", &[video.clone(), audio.clone()])];

    assert!(release_streams(&streams).is_ok());
    assert!(release_streams(&streams).is_ok());

    assert_eq!(live_track_count(&streams), 0);
    assert_eq!(video.state(), TrackState::Ended);
    assert_eq!(audio.state(), TrackState::Ended);
    assert_eq!(video.stop_calls(), 1);
}

#[tokio::test]
async fn test_media_failure_does_not_stop_later_steps() {
    let h = harness();
    let lockdown = Arc::new(MemoryLockdownHost::default());
    let local = MemoryEphemeralStore::new(StorageScope::Local);
    local.insert("quiz_answers_S1", "{\"q1\":\"b\"}");
    local.insert("theme", "dark");
    let host = SessionHost {
        lockdown: lockdown.clone(),
        ephemeral: vec![local.clone()],
        ..detached_host()
    };

    h.manager
        .initialize("student", "quiz", "S1", host)
        .await
        .unwrap();
    h.manager.engage_lockdown("S1").await.unwrap();
    h.manager
        .register_stream(
            "S1",
            capture_stream("camera", &[MemoryTrack::failing("v1", TrackKind::Video)]),
        )
        .await
        .unwrap();
    h.manager
        .register_process("S1", ProcessKind::Webcam)
        .await
        .unwrap();

    let callback_ran = Arc::new(AtomicBool::new(false));
    let flag = callback_ran.clone();
    h.manager
        .register_termination_callback(
            "S1",
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await
        .unwrap();

    let result = h.manager.terminate("student", "quiz", "S1").await;

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(
        result.errors.iter().filter(|e| e.contains("media")).count(),
        1
    );
    assert!(result
        .warnings
        .contains(&"Some media streams may still be active".to_string()));

    // Lockdown removal ran
    assert!(lockdown.active().is_empty());
    // Process stop and callbacks ran
    assert!(callback_ran.load(Ordering::SeqCst));
    assert_eq!(result.summary.data_integrity.records_collected, 1);
    // Persistence ran
    assert_eq!(result.metadata.data_backup_status, BackupStatus::Success);
    assert!(h.documents.get("S1").await.is_some());
    // Storage clear ran
    assert_eq!(local.keys(), vec!["theme".to_string()]);
    assert_eq!(result.metadata.cleanup_status, CleanupStatus::Complete);

    assert_eq!(result.metadata.termination_type, TerminationKind::Error);
    assert!(result
        .metadata
        .recovery_actions
        .iter()
        .any(|a| a.contains("Media release retry failed")));
    assert!(!h.manager.registry().contains("S1").await);
}

#[tokio::test]
async fn test_fullscreen_exits_consume_whole_session() {
    let h = harness();
    h.manager
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();
    for _ in 0..2 {
        h.manager
            .record_violation("S1", ViolationType::FullscreenExit, Severity::High, "left full-screen", None)
            .await
            .unwrap();
    }
    h.clock.advance(Duration::milliseconds(60_000));

    let result = h.manager.terminate("student", "quiz", "S1").await;

    assert_eq!(result.summary.total_duration, 60_000);
    assert_eq!(result.summary.compliance_metrics.full_screen_maintained, 0.0);
    assert_eq!(result.summary.compliance_metrics.focus_retention_rate, 100.0);
}

#[tokio::test]
async fn test_overall_score_applies_every_penalty() {
    let h = harness();
    let probe = ReportedProbe::new(ClientReport {
        online: false,
        response_time_ms: Some(5000.0),
        ..ClientReport::default()
    });
    h.manager
        .initialize("student", "quiz", "S1", SessionHost::detached(Arc::new(probe)))
        .await
        .unwrap();
    for _ in 0..10 {
        h.manager
            .record_violation("S1", ViolationType::TabSwitch, Severity::Medium, "tab switch", None)
            .await
            .unwrap();
    }

    let result = h.manager.terminate("student", "quiz", "S1").await;

    let performance = &result.summary.system_performance;
    assert_eq!(performance.network_stability, 0.0);
    assert_eq!(performance.average_response_time, 5000.0);
    assert_eq!(performance.overall_score, 55);
}

#[tokio::test]
async fn test_durable_failure_falls_back_to_local_backup() {
    let h = harness();
    h.documents.set_failing(true);
    h.manager
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();

    let result = h.manager.terminate("student", "quiz", "S1").await;

    assert_eq!(result.metadata.data_backup_status, BackupStatus::Partial);
    assert!(result.warnings.iter().any(|w| w.contains("saved locally")));
    assert!(result.success);
    assert_eq!(result.summary.data_integrity.backup_status, BackupStatus::Partial);

    let backup = h.backups.get(&backup_key("S1")).await.unwrap();
    assert_eq!(backup.session.session_id, "S1");
    assert_eq!(backup.version, "1.0");
}

#[tokio::test]
async fn test_both_stores_failing_reports_two_errors() {
    let h = harness();
    h.documents.set_failing(true);
    h.backups.set_failing(true);
    h.manager
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();

    let result = h.manager.terminate("student", "quiz", "S1").await;

    assert!(!result.success);
    assert_eq!(result.metadata.data_backup_status, BackupStatus::Failed);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].starts_with("data save:"));
    assert!(result.errors[1].starts_with("emergency backup:"));
    assert_eq!(result.summary.data_integrity.data_loss_percentage, 100.0);
    assert!(!result.summary.data_integrity.checksum_verification);
    assert!(!h.manager.registry().contains("S1").await);
}

#[tokio::test]
async fn test_violation_ids_are_unique() {
    let h = harness();
    h.manager
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();

    let mut ids = HashSet::new();
    for _ in 0..1000 {
        let event = h
            .manager
            .record_violation("S1", ViolationType::WindowBlur, Severity::Low, "blur", None)
            .await
            .unwrap();
        ids.insert(event.id);
    }
    assert_eq!(ids.len(), 1000);
}

#[tokio::test]
async fn test_end_to_end_exam_session() {
    let h = harness();
    let notifier = Arc::new(RecordingNotifier::default());
    let host = SessionHost {
        notifier: notifier.clone(),
        ..detached_host()
    };

    let session = h.manager.initialize("S1", "X1", "Q1", host).await.unwrap();
    assert!(session.is_active());

    h.manager
        .record_violation("Q1", ViolationType::TabSwitch, Severity::Medium, "Switched tab", None)
        .await
        .unwrap();
    h.manager
        .record_violation("Q1", ViolationType::FullscreenExit, Severity::High, "Exited full-screen", None)
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(10));

    let result = h.manager.terminate("S1", "X1", "Q1").await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.session_id, "Q1");
    assert_eq!(result.summary.total_duration, 600_000);
    assert_eq!(result.summary.violation_count, 2);
    assert_eq!(result.summary.violations_by_type.len(), 2);
    assert_eq!(result.summary.violations_by_type[&ViolationType::TabSwitch], 1);
    assert_eq!(result.summary.violations_by_type[&ViolationType::FullscreenExit], 1);
    assert_eq!(result.metadata.data_backup_status, BackupStatus::Success);
    assert_eq!(result.metadata.cleanup_status, CleanupStatus::Complete);
    assert_eq!(result.metadata.termination_type, TerminationKind::Normal);
    assert!(!h.manager.registry().contains("Q1").await);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["summary"]["violationCount"], 2);
    assert_eq!(json["summary"]["violationsByType"]["tab_switch"], 1);
    assert_eq!(json["summary"]["violationsByType"]["fullscreen_exit"], 1);
    assert_eq!(json["metadata"]["dataBackupStatus"], "success");
    assert_eq!(json["metadata"]["cleanupStatus"], "complete");

    let record = h.documents.get("Q1").await.unwrap();
    assert!(record.verify().unwrap());
    assert_eq!(record.violations.len(), 2);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, NotificationLevel::Success);
    assert_eq!(sent[1].0, NotificationLevel::Info);
    assert!(sent[1].1.contains('2'));
}

#[tokio::test]
async fn test_distinct_sessions_terminate_concurrently() {
    let h = harness();
    for id in ["A", "B", "C"] {
        h.manager
            .initialize("student", "quiz", id, detached_host())
            .await
            .unwrap();
    }

    let (a, b, c) = tokio::join!(
        h.manager.terminate("student", "quiz", "A"),
        h.manager.terminate("student", "quiz", "B"),
        h.manager.terminate("student", "quiz", "C")
    );

    assert!(a.success && b.success && c.success);
    assert_eq!(h.manager.active_sessions().await, 0);
    assert_eq!(h.documents.len().await, 3);
}

#[tokio::test]
async fn test_process_updates_survive_until_termination() {
    let h = harness();
    h.manager
        .initialize("student", "quiz", "S1", detached_host())
        .await
        .unwrap();
    h.manager
        .register_process("S1", ProcessKind::ScreenShare)
        .await
        .unwrap();
    h.manager
        .update_process("S1", ProcessKind::ScreenShare, ProcessStatus::Error)
        .await
        .unwrap();

    let session = h.manager.session("S1").await.unwrap();
    assert_eq!(session.monitoring_processes[0].status, ProcessStatus::Error);

    let result = h.manager.terminate("student", "quiz", "S1").await;
    assert!(result.success);
}

#[tokio::test]
async fn test_file_stores_persist_verifiable_record() {
    let dir = tempfile::tempdir().unwrap();
    let documents = Arc::new(FileDocumentStore::new(dir.path().join("records")));
    let manager = ProctorManager::new(
        documents.clone(),
        Arc::new(FileBackupStore::new(dir.path().join("backup"))),
    );

    manager
        .initialize("S1", "X1", "Q1", detached_host())
        .await
        .unwrap();
    let result = manager.terminate("S1", "X1", "Q1").await;
    assert!(result.success, "{:?}", result.errors);

    let record = documents.load("Q1").await.unwrap();
    assert_eq!(record.student_id, "S1");
    assert_eq!(record.data_integrity.version, "1.0");
    assert!(record.verify().unwrap());
}

#[tokio::test]
async fn test_look_alike_session_ids_keep_separate_records() {
    let dir = tempfile::tempdir().unwrap();
    let documents = Arc::new(FileDocumentStore::new(dir.path().join("records")));
    let manager = ProctorManager::new(
        documents.clone(),
        Arc::new(FileBackupStore::new(dir.path().join("backup"))),
    );

    for (student_id, session_id) in [("alice", "exam/1"), ("bob", "exam_1")] {
        manager
            .initialize(student_id, "X1", session_id, detached_host())
            .await
            .unwrap();
        let result = manager.terminate(student_id, "X1", session_id).await;
        assert!(result.success, "{:?}", result.errors);
    }

    assert_eq!(
        std::fs::read_dir(dir.path().join("records")).unwrap().count(),
        2
    );
    let alice = documents.load("exam/1").await.unwrap();
    assert_eq!(alice.session_id, "exam/1");
    assert_eq!(alice.student_id, "alice");
    assert_eq!(documents.load("exam_1").await.unwrap().student_id, "bob");
}
