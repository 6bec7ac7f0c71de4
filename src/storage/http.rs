use std::time::Duration;

use async_trait::async_trait;

use super::{SessionRecord, StorageGateway};
use crate::error::{ProctorError, Result};

#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub api_url: String,
    pub collection: String,
    pub timeout_secs: u64,
}

/// Durable store backed by a JSON document API.
///
/// Records are written with `PUT {api_url}/{collection}/{session_id}`, so a
/// retried save replaces the same document.
pub struct HttpDocumentStore {
    config: HttpStoreConfig,
    client: reqwest::Client,
}

impl HttpDocumentStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    /// The session id is percent-encoded into a single path segment.
    pub fn document_url(&self, session_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.collection,
            urlencoding::encode(session_id)
        )
    }
}

#[async_trait]
impl StorageGateway for HttpDocumentStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let url = self.document_url(&record.session_id);

        let response = self
            .client
            .put(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| ProctorError::storage(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProctorError::storage(format!(
                "Save failed with status {}: {}",
                status, error_text
            )));
        }

        tracing::info!(
            session_id = %record.session_id,
            url = %url,
            "Session record saved to document API"
        );
        Ok(())
    }

    /// Check if the document API is reachable
    async fn health_check(&self) -> Result<bool> {
        let health_url = format!("{}/health", self.config.api_url.trim_end_matches('/'));

        match self.client.get(&health_url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}
