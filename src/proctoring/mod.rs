//! Exam proctoring session lifecycle.
//!
//! [`ProctorManager`] owns every active session: it starts monitoring,
//! collects violations and resources while the exam runs, and tears the
//! session down through a fixed sequence of isolated steps that always yields
//! a [`TerminationResult`].

pub mod clock;
pub mod host;
pub mod lockdown;
pub mod manager;
pub mod memory;
pub mod probe;
pub mod registry;
pub mod resources;
pub mod session;
pub mod state;
pub mod summary;
pub mod termination;
pub mod violations;

pub use clock::{Clock, ManualClock, SystemClock};
pub use host::{EphemeralStore, NotificationLevel, Notifier, SessionHost, StorageScope};
pub use lockdown::{LockdownController, LockdownHost, Restriction};
pub use manager::ProctorManager;
pub use probe::{
    check_compatibility, ClientReport, CompatibilityReport, FeatureSupport, ReportedProbe,
    SystemMetrics, SystemProbe,
};
pub use registry::{ActiveSession, SessionRegistry, TerminationCallback};
pub use resources::{
    CaptureStream, MediaTrack, MonitoringProcess, ProcessKind, ProcessStatus, TrackKind,
    TrackState,
};
pub use session::ProctoringSession;
pub use state::SessionStatus;
pub use summary::{compute_summary, SessionSummary};
pub use termination::{
    BackupStatus, CleanupStatus, RecoveryCause, TerminationKind, TerminationMetadata,
    TerminationResult,
};
pub use violations::{Severity, ViolationEvent, ViolationLog, ViolationType};
