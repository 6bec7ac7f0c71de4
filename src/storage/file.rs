use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use super::{file_stem, BackupStore, EmergencyBackup, SessionRecord, StorageGateway};
use crate::error::{ProctorError, Result};

/// Writes `value` as pretty JSON next to its final path, then renames it into
/// place so readers never observe a partial document.
async fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let path = dir.join(format!("{}.json", name));
    let tmp = dir.join(format!(".{}.json.tmp", name));
    let bytes = serde_json::to_vec_pretty(value)?;

    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}

/// One JSON document per session under a data directory.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    dir: PathBuf,
}

impl FileDocumentStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub async fn load(&self, session_id: &str) -> Result<SessionRecord> {
        let path = self.dir.join(format!("{}.json", file_stem(session_id)));
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl StorageGateway for FileDocumentStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let path = write_json(&self.dir, &file_stem(&record.session_id), record)
            .await
            .map_err(|e| ProctorError::storage(e.to_string()))?;

        tracing::info!(
            session_id = %record.session_id,
            file = %path.display(),
            "Session record saved"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(tokio::fs::create_dir_all(&self.dir).await.is_ok())
    }
}

/// Emergency backups as JSON files in a local directory.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub async fn load(&self, key: &str) -> Result<EmergencyBackup> {
        let path = self.dir.join(format!("{}.json", file_stem(key)));
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn local_save(&self, key: &str, payload: &EmergencyBackup) -> Result<()> {
        let path = write_json(&self.dir, &file_stem(key), payload)
            .await
            .map_err(|e| ProctorError::backup(e.to_string()))?;

        tracing::warn!(
            session_id = %payload.session.session_id,
            file = %path.display(),
            "Emergency backup written"
        );
        Ok(())
    }
}
