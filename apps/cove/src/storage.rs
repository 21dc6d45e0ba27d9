use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("document not found")]
    NotFound,
    #[error("invalid document id: {0}")]
    InvalidId(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Envelope written to disk for each saved document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub content: Value,
    pub updated_at: DateTime<Utc>,
}

/// File-backed document store: one JSON envelope per document id under the
/// data directory. Invoked from the REST handlers only, never from the
/// relay path.
#[derive(Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Document ids become file names, so anything that could escape the
    /// data directory is rejected outright.
    fn doc_path(&self, doc_id: &str) -> Result<PathBuf, StorageError> {
        if doc_id.is_empty()
            || doc_id.contains('/')
            || doc_id.contains('\\')
            || doc_id.contains("..")
        {
            return Err(StorageError::InvalidId(doc_id.to_string()));
        }
        Ok(self.root.join(format!("{doc_id}.json")))
    }

    /// Durably store `content` under `doc_id`, overwriting any previous
    /// version.
    pub async fn save(&self, doc_id: &str, content: Value) -> Result<StoredDocument, StorageError> {
        let path = self.doc_path(doc_id)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let document = StoredDocument {
            id: doc_id.to_string(),
            content,
            updated_at: Utc::now(),
        };
        let serialized = serde_json::to_vec(&document)?;
        tokio::fs::write(&path, &serialized).await?;

        debug!("Saved document {} ({} bytes)", doc_id, serialized.len());
        Ok(document)
    }

    pub async fn load(&self, doc_id: &str) -> Result<StoredDocument, StorageError> {
        let path = self.doc_path(doc_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::NotFound),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn delete(&self, doc_id: &str) -> Result<(), StorageError> {
        let path = self.doc_path(doc_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted document {}", doc_id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
