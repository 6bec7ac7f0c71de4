//! Host collaborators that forward commands to a connected exam client.
//!
//! Every command is a [`ProctorMessage`] pushed onto the connection's
//! outbound queue. A command fails with [`ProctorError::HostChannelClosed`]
//! once the client is gone.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use warp::ws::Message;

use super::signaling::ProctorMessage;
use crate::error::{ProctorError, Result};
use crate::proctoring::{
    EphemeralStore, LockdownHost, MediaTrack, NotificationLevel, Notifier, Restriction,
    StorageScope, TrackKind, TrackState,
};

/// Outbound half of a session connection.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    session_id: String,
    sender: mpsc::UnboundedSender<Message>,
}

impl ClientChannel {
    pub fn new(session_id: &str, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            session_id: session_id.to_string(),
            sender,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn send(&self, message: &ProctorMessage) -> Result<()> {
        if self.sender.is_closed() {
            return Err(ProctorError::HostChannelClosed(self.session_id.clone()));
        }
        let text = serde_json::to_string(message)?;
        self.sender
            .send(Message::text(text))
            .map_err(|_| ProctorError::HostChannelClosed(self.session_id.clone()))
    }
}

/// A capture track living in the client; stopping it sends `StopTrack`.
#[derive(Debug)]
pub struct ChannelTrack {
    id: String,
    kind: TrackKind,
    ended: AtomicBool,
    channel: ClientChannel,
}

impl ChannelTrack {
    pub fn new(id: &str, kind: TrackKind, channel: ClientChannel) -> Self {
        Self {
            id: id.to_string(),
            kind,
            ended: AtomicBool::new(false),
            channel,
        }
    }
}

impl MediaTrack for ChannelTrack {
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
        self.channel.send(&ProctorMessage::StopTrack {
            track_id: self.id.clone(),
        })?;
        self.ended.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Lockdown enforced by the client through `ApplyLockdown` and
/// `ReleaseLockdown` commands.
#[derive(Debug)]
pub struct ChannelLockdownHost {
    channel: ClientChannel,
    applied: Mutex<BTreeSet<Restriction>>,
}

impl ChannelLockdownHost {
    pub fn new(channel: ClientChannel) -> Self {
        Self {
            channel,
            applied: Mutex::new(BTreeSet::new()),
        }
    }
}

impl LockdownHost for ChannelLockdownHost {
    fn apply(&self, restriction: Restriction) -> Result<()> {
        self.channel.send(&ProctorMessage::ApplyLockdown {
            restriction,
            shortcuts: restriction
                .blocked_shortcuts()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })?;
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(restriction);
        Ok(())
    }

    fn lift(&self, restriction: Restriction) -> Result<()> {
        self.channel
            .send(&ProctorMessage::ReleaseLockdown { restriction })?;
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&restriction);
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&Restriction::Fullscreen)
    }
}

/// One client storage area, cleared with a `ClearStorage` command.
#[derive(Debug)]
pub struct ChannelEphemeralStore {
    scope: StorageScope,
    channel: ClientChannel,
}

impl ChannelEphemeralStore {
    pub fn new(scope: StorageScope, channel: ClientChannel) -> Self {
        Self { scope, channel }
    }

    /// One store per client storage area.
    pub fn all(channel: &ClientChannel) -> Vec<Arc<dyn EphemeralStore>> {
        [
            StorageScope::Session,
            StorageScope::Local,
            StorageScope::IndexedDb,
            StorageScope::Cookies,
        ]
        .into_iter()
        .map(|scope| Arc::new(Self::new(scope, channel.clone())) as Arc<dyn EphemeralStore>)
        .collect()
    }
}

#[async_trait]
impl EphemeralStore for ChannelEphemeralStore {
    fn scope(&self) -> StorageScope {
        self.scope
    }

    /// The client does not report how many entries it dropped.
    async fn clear_session(&self, session_id: &str) -> Result<usize> {
        self.channel.send(&ProctorMessage::ClearStorage {
            scope: self.scope,
            session_id: session_id.to_string(),
        })?;
        Ok(0)
    }
}

#[derive(Debug)]
pub struct ChannelNotifier {
    channel: ClientChannel,
}

impl ChannelNotifier {
    pub fn new(channel: ClientChannel) -> Self {
        Self { channel }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        let sent = self.channel.send(&ProctorMessage::Notification {
            level,
            message: message.to_string(),
        });
        if let Err(e) = sent {
            tracing::debug!(session_id = %self.channel.session_id, error = %e, "Notification dropped");
        }
    }
}
