use thiserror::Error;

/// Custom error types for the proctoring service
#[derive(Debug, Error)]
pub enum ProctorError {
    /// Session registry errors
    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Session {0} already exists")]
    SessionAlreadyExists(String),

    #[error("Session {0} is no longer active")]
    SessionNotActive(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// Resource errors
    #[error("Failed to release media streams: {0}")]
    MediaReleaseFailed(String),

    #[error("Failed to apply lockdown: {0}")]
    LockdownEngageFailed(String),

    #[error("Failed to remove lockdown: {0}")]
    LockdownReleaseFailed(String),

    #[error("No {0} monitoring process registered")]
    ProcessNotRegistered(String),

    #[error("Termination callback failed: {0}")]
    CallbackFailed(String),

    #[error("Host channel closed for session {0}")]
    HostChannelClosed(String),

    /// Storage errors
    #[error("Failed to save session record: {0}")]
    StorageSaveFailed(String),

    #[error("Failed to write emergency backup: {0}")]
    BackupSaveFailed(String),

    #[error("Failed to clear ephemeral storage: {0}")]
    EphemeralClearFailed(String),

    #[error("Failed to serialize record: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigurationParseFailed(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using ProctorError
pub type Result<T> = std::result::Result<T, ProctorError>;

impl ProctorError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        ProctorError::Internal(msg.into())
    }

    /// Helper to create durable storage errors
    pub fn storage(msg: impl Into<String>) -> Self {
        ProctorError::StorageSaveFailed(msg.into())
    }

    /// Helper to create backup storage errors
    pub fn backup(msg: impl Into<String>) -> Self {
        ProctorError::BackupSaveFailed(msg.into())
    }
}
