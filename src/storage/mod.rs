//! Persistence of terminated sessions.
//!
//! The durable [`StorageGateway`] receives one [`SessionRecord`] per
//! terminated session. When it fails, the same payload is written as an
//! [`EmergencyBackup`] to a [`BackupStore`] that only lives on the local
//! machine.

mod file;
mod http;
mod memory;

pub use file::{FileBackupStore, FileDocumentStore};
pub use http::{HttpDocumentStore, HttpStoreConfig};
pub use memory::{MemoryBackupStore, MemoryDocumentStore};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::error::Result;
use crate::proctoring::{ProctoringSession, SessionStatus, SessionSummary, SystemMetrics, ViolationEvent};

pub const RECORD_VERSION: &str = "1.0";
pub const RECORD_FORMAT: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordIntegrity {
    pub checksum: String,
    pub version: String,
    pub format: String,
}

/// The document written for every terminated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub student_id: String,
    pub quiz_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub violations: Vec<ViolationEvent>,
    pub system_metrics: SystemMetrics,
    pub summary: SessionSummary,
    pub created_at: DateTime<Utc>,
    pub data_integrity: RecordIntegrity,
}

impl SessionRecord {
    pub fn new(
        session: &ProctoringSession,
        summary: &SessionSummary,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            session_id: session.session_id.clone(),
            student_id: session.student_id.clone(),
            quiz_id: session.quiz_id.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            status: session.status,
            violations: session.violations.clone(),
            system_metrics: session.system_metrics.clone(),
            summary: summary.clone(),
            created_at,
            data_integrity: RecordIntegrity {
                checksum: compute_checksum(session, summary)?,
                version: RECORD_VERSION.to_string(),
                format: RECORD_FORMAT.to_string(),
            },
        })
    }

    /// Recompute the checksum over the record's content.
    pub fn verify(&self) -> Result<bool> {
        let content = serde_json::to_vec(&(
            &self.session_id,
            &self.student_id,
            &self.quiz_id,
            &self.start_time,
            &self.end_time,
            &self.violations,
            &self.summary,
        ))?;
        Ok(hex::encode(Sha256::digest(&content)) == self.data_integrity.checksum)
    }
}

/// SHA-256 over the identifying fields, violations and summary, hex encoded.
pub fn compute_checksum(session: &ProctoringSession, summary: &SessionSummary) -> Result<String> {
    let content = serde_json::to_vec(&(
        &session.session_id,
        &session.student_id,
        &session.quiz_id,
        &session.start_time,
        &session.end_time,
        &session.violations,
        summary,
    ))?;
    Ok(hex::encode(Sha256::digest(&content)))
}

/// Local-only copy written when the durable save fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyBackup {
    pub session: ProctoringSession,
    pub summary: SessionSummary,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl EmergencyBackup {
    pub fn new(session: &ProctoringSession, summary: &SessionSummary, timestamp: DateTime<Utc>) -> Self {
        Self {
            session: session.clone(),
            summary: summary.clone(),
            timestamp,
            version: RECORD_VERSION.to_string(),
        }
    }
}

pub fn backup_key(session_id: &str) -> String {
    format!("proctoring_backup_{}", session_id)
}

/// Durable document store.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn save(&self, record: &SessionRecord) -> Result<()>;

    /// Whether the store can currently accept records.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// On-device fallback store.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn local_save(&self, key: &str, payload: &EmergencyBackup) -> Result<()>;
}

/// Build the durable and fallback stores from configuration.
///
/// An HTTP document API is used when one is configured, otherwise records
/// are written as JSON files under the data directory.
pub fn from_config(config: &StorageConfig) -> Result<(Arc<dyn StorageGateway>, Arc<dyn BackupStore>)> {
    let durable: Arc<dyn StorageGateway> = match &config.api_url {
        Some(api_url) => {
            tracing::info!(api_url = %api_url, "Using HTTP document store");
            Arc::new(HttpDocumentStore::new(HttpStoreConfig {
                api_url: api_url.clone(),
                collection: config.collection.clone(),
                timeout_secs: config.api_timeout_secs,
            })?)
        }
        None => {
            tracing::info!(dir = %config.data_dir, "Using file document store");
            Arc::new(FileDocumentStore::new(&config.data_dir))
        }
    };
    let backup: Arc<dyn BackupStore> = Arc::new(FileBackupStore::new(&config.backup_dir));
    Ok((durable, backup))
}

/// File name stem for a store key. Hex of the key's bytes, so two distinct
/// keys never share a file, even on case-insensitive file systems.
pub(crate) fn file_stem(key: &str) -> String {
    hex::encode(key.as_bytes())
}
