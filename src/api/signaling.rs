use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::Message;

use super::channel::{
    ChannelEphemeralStore, ChannelLockdownHost, ChannelNotifier, ChannelTrack, ClientChannel,
};
use crate::proctoring::{
    CaptureStream, ClientReport, MediaTrack, NotificationLevel, ProcessKind, ProcessStatus,
    ProctorManager, ProctoringSession, ReportedProbe, Restriction, SessionHost, Severity,
    StorageScope, TerminationKind, TerminationResult, TrackKind, ViolationType,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: String,
    pub kind: TrackKind,
}

/// Session channel messages. Field names are camelCase like the REST bodies
/// and the persisted records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ProctorMessage {
    Initialize {
        student_id: String,
        quiz_id: String,
        session_id: String,
        report: Option<ClientReport>,
    },

    MediaReady {
        stream_id: String,
        tracks: Vec<TrackDescriptor>,
    },

    Violation {
        violation_type: ViolationType,
        severity: Severity,
        description: String,
        metadata: Option<serde_json::Value>,
    },

    /// Start (or restart) a monitoring process of the given kind.
    ProcessStarted {
        process_type: ProcessKind,
    },

    ProcessUpdate {
        process_type: ProcessKind,
        status: ProcessStatus,
    },

    Terminate {
        termination_type: Option<TerminationKind>,
    },

    SessionStarted {
        session: ProctoringSession,
    },

    StopTrack {
        track_id: String,
    },

    ApplyLockdown {
        restriction: Restriction,
        shortcuts: Vec<String>,
    },

    ReleaseLockdown {
        restriction: Restriction,
    },

    ClearStorage {
        scope: StorageScope,
        session_id: String,
    },

    Notification {
        level: NotificationLevel,
        message: String,
    },

    Terminated {
        result: TerminationResult,
    },

    Error {
        message: String,
    },
}

/// Drives one exam client connection. The connection itself is the session
/// host; at most one session is bound to it at a time.
pub struct SessionSignalingHandler {
    manager: Arc<ProctorManager>,
    sender: mpsc::UnboundedSender<Message>,
    bound: Option<BoundSession>,
}

struct BoundSession {
    student_id: String,
    quiz_id: String,
    channel: ClientChannel,
}

impl SessionSignalingHandler {
    pub fn new(manager: Arc<ProctorManager>, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            manager,
            sender,
            bound: None,
        }
    }

    pub async fn handle_message(&mut self, message: ProctorMessage) {
        match message {
            ProctorMessage::Initialize {
                student_id,
                quiz_id,
                session_id,
                report,
            } => {
                self.handle_initialize(student_id, quiz_id, session_id, report)
                    .await
            }
            ProctorMessage::MediaReady { stream_id, tracks } => {
                self.handle_media_ready(stream_id, tracks).await
            }
            ProctorMessage::Violation {
                violation_type,
                severity,
                description,
                metadata,
            } => {
                let Some(session_id) = self.bound_session_id() else {
                    return self.send_error("No session bound to this connection");
                };
                if let Err(e) = self
                    .manager
                    .record_violation(&session_id, violation_type, severity, &description, metadata)
                    .await
                {
                    self.send_error(&e.to_string());
                }
            }
            ProctorMessage::ProcessStarted { process_type } => {
                let Some(session_id) = self.bound_session_id() else {
                    return self.send_error("No session bound to this connection");
                };
                if let Err(e) = self.manager.register_process(&session_id, process_type).await {
                    self.send_error(&e.to_string());
                }
            }
            ProctorMessage::ProcessUpdate {
                process_type,
                status,
            } => {
                let Some(session_id) = self.bound_session_id() else {
                    return self.send_error("No session bound to this connection");
                };
                if let Err(e) = self
                    .manager
                    .update_process(&session_id, process_type, status)
                    .await
                {
                    self.send_error(&e.to_string());
                }
            }
            ProctorMessage::Terminate { termination_type } => {
                self.handle_terminate(termination_type.unwrap_or(TerminationKind::Normal))
                    .await
            }
            other => {
                tracing::warn!(message = ?other, "Client sent a server-only message");
                self.send_error("Unexpected message type");
            }
        }
    }

    async fn handle_initialize(
        &mut self,
        student_id: String,
        quiz_id: String,
        session_id: String,
        report: Option<ClientReport>,
    ) {
        if let Some(bound) = &self.bound {
            let message = format!(
                "Connection already bound to session {}",
                bound.channel.session_id()
            );
            return self.send_error(&message);
        }

        let channel = ClientChannel::new(&session_id, self.sender.clone());
        let host = SessionHost {
            probe: Arc::new(ReportedProbe::new(report.unwrap_or_default())),
            lockdown: Arc::new(ChannelLockdownHost::new(channel.clone())),
            ephemeral: ChannelEphemeralStore::all(&channel),
            notifier: Arc::new(ChannelNotifier::new(channel.clone())),
        };

        let session = match self
            .manager
            .initialize(&student_id, &quiz_id, &session_id, host)
            .await
        {
            Ok(session) => session,
            Err(e) => return self.send_error(&e.to_string()),
        };

        self.send(&ProctorMessage::SessionStarted { session });
        self.bound = Some(BoundSession {
            student_id,
            quiz_id,
            channel,
        });

        if let Err(e) = self.manager.engage_lockdown(&session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Lockdown only partially engaged");
            self.send_error(&e.to_string());
        }
    }

    async fn handle_media_ready(&mut self, stream_id: String, tracks: Vec<TrackDescriptor>) {
        let Some(bound) = &self.bound else {
            return self.send_error("No session bound to this connection");
        };
        let session_id = bound.channel.session_id().to_string();

        let tracks: Vec<Arc<dyn MediaTrack>> = tracks
            .into_iter()
            .map(|t| {
                Arc::new(ChannelTrack::new(&t.id, t.kind, bound.channel.clone()))
                    as Arc<dyn MediaTrack>
            })
            .collect();
        let stream = CaptureStream::new(stream_id, tracks);
        let has_video = stream.has_kind(TrackKind::Video);

        let mut result = self.manager.register_stream(&session_id, stream).await;
        if result.is_ok() && has_video {
            result = self
                .manager
                .register_process(&session_id, ProcessKind::Webcam)
                .await
                .map(|_| ());
        }
        if let Err(e) = result {
            self.send_error(&e.to_string());
        }
    }

    async fn handle_terminate(&mut self, kind: TerminationKind) {
        let Some(bound) = self.bound.take() else {
            return self.send_error("No session bound to this connection");
        };

        let result = self
            .manager
            .terminate_with(
                &bound.student_id,
                &bound.quiz_id,
                bound.channel.session_id(),
                kind,
            )
            .await;
        self.send(&ProctorMessage::Terminated { result });
    }

    /// Called when the socket closes. An exam still running on this
    /// connection is force-terminated.
    pub async fn cleanup(&mut self) {
        let Some(bound) = self.bound.take() else {
            return;
        };
        let session_id = bound.channel.session_id();
        if !self.manager.is_active(session_id).await {
            return;
        }

        tracing::warn!(session_id = %session_id, "Client disconnected during exam");
        let result = self
            .manager
            .terminate_with(&bound.student_id, &bound.quiz_id, session_id, TerminationKind::Forced)
            .await;
        tracing::info!(
            session_id = %session_id,
            success = result.success,
            "Forced termination after disconnect"
        );
    }

    fn bound_session_id(&self) -> Option<String> {
        self.bound
            .as_ref()
            .map(|bound| bound.channel.session_id().to_string())
    }

    fn send(&self, message: &ProctorMessage) {
        match serde_json::to_string(message) {
            Ok(text) => {
                if self.sender.send(Message::text(text)).is_err() {
                    tracing::debug!("Client connection closed before message could be sent");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize message"),
        }
    }

    fn send_error(&self, message: &str) {
        self.send(&ProctorMessage::Error {
            message: message.to_string(),
        });
    }
}
