use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BackupStore, EmergencyBackup, SessionRecord, StorageGateway};
use crate::error::{ProctorError, Result};

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    records: RwLock<HashMap<String, SessionRecord>>,
    fail: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl StorageGateway for MemoryDocumentStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProctorError::storage("document store unavailable"));
        }
        self.records
            .write()
            .await
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    payloads: RwLock<HashMap<String, EmergencyBackup>>,
    fail: AtomicBool,
}

impl MemoryBackupStore {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn get(&self, key: &str) -> Option<EmergencyBackup> {
        self.payloads.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.payloads.read().await.len()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn local_save(&self, key: &str, payload: &EmergencyBackup) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProctorError::backup("local storage quota exceeded"));
        }
        self.payloads
            .write()
            .await
            .insert(key.to_string(), payload.clone());
        Ok(())
    }
}
