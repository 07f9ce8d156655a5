//! Upload Registry Module
//!
//! In-memory table of upload records keyed by upload id, with JSON
//! persistence. The registry is an explicit object constructed at startup
//! from the persisted file and serialized back on shutdown; nothing else in
//! the system holds upload state.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{Result, UploadError};

/// One upload's durable attributes.
///
/// `filename` is set once when the file fragment's headers are parsed;
/// `text` is set when the field fragment completes or through the edit
/// endpoint. Records are never deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Registry of upload records with JSON file persistence.
pub struct UploadRegistry {
    path: PathBuf,
    records: RwLock<HashMap<String, UploadRecord>>,
}

impl UploadRegistry {
    /// Load the registry from its persistence file.
    ///
    /// A missing file yields an empty registry; a present but unreadable or
    /// unparsable file is an error, since silently discarding records would
    /// lose uploads.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let records = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let records: HashMap<String, UploadRecord> = serde_json::from_slice(&raw)?;
                info!(
                    "Loaded upload registry: path={:?}, records={}",
                    path,
                    records.len()
                );
                records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No upload registry at {:?}, starting empty", path);
                HashMap::new()
            }
            Err(e) => {
                return Err(UploadError::IoError(format!(
                    "failed to read upload registry {:?}: {}",
                    path, e
                )))
            }
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Create (or reset) the record for an upload id.
    pub async fn create(&self, upload_id: &str) {
        let mut records = self.records.write().await;
        if records
            .insert(upload_id.to_string(), UploadRecord::default())
            .is_some()
        {
            warn!("Upload record reset by new ingest: id={}", upload_id);
        }
    }

    /// Whether a record exists for the given id.
    pub async fn contains(&self, upload_id: &str) -> bool {
        self.records.read().await.contains_key(upload_id)
    }

    /// Snapshot of one record.
    pub async fn get(&self, upload_id: &str) -> Option<UploadRecord> {
        self.records.read().await.get(upload_id).cloned()
    }

    /// Record the client-side filename for an upload.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUploadId` if no record exists.
    pub async fn set_filename(&self, upload_id: &str, filename: &str) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(upload_id) {
            Some(record) => {
                record.filename = Some(filename.to_string());
                Ok(())
            }
            None => Err(UploadError::UnknownUploadId(upload_id.to_string())),
        }
    }

    /// Set the text attribute for an upload. This is also the entry point
    /// used by the edit endpoint, which must reject unknown ids.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUploadId` if no record exists.
    pub async fn set_text(&self, upload_id: &str, text: String) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(upload_id) {
            Some(record) => {
                record.text = Some(text);
                Ok(())
            }
            None => Err(UploadError::UnknownUploadId(upload_id.to_string())),
        }
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Serialize all records to the persistence file.
    ///
    /// Written to a temporary file and renamed so a crash mid-write cannot
    /// truncate the previous registry.
    pub async fn persist(&self) -> Result<()> {
        let snapshot = {
            let records = self.records.read().await;
            serde_json::to_vec_pretty(&*records)?
        };

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &snapshot).await.map_err(|e| {
            UploadError::IoError(format!(
                "failed to write upload registry {:?}: {}",
                temp_path, e
            ))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            UploadError::IoError(format!(
                "failed to commit upload registry {:?}: {}",
                self.path, e
            ))
        })?;

        debug!("Persisted upload registry: path={:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let registry = UploadRegistry::load(dir.path().join("uploads.db"))
            .await
            .unwrap();
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_set_text_unknown_id_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = UploadRegistry::load(dir.path().join("uploads.db"))
            .await
            .unwrap();
        let err = registry
            .set_text("nope", "value".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownUploadId(_)));
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uploads.db");

        let registry = UploadRegistry::load(path.clone()).await.unwrap();
        registry.create("id1").await;
        registry.set_filename("id1", "a.txt").await.unwrap();
        registry.set_text("id1", "note".to_string()).await.unwrap();
        registry.create("id2").await;
        registry.persist().await.unwrap();

        let reloaded = UploadRegistry::load(path).await.unwrap();
        assert_eq!(reloaded.len().await, 2);
        let record = reloaded.get("id1").await.unwrap();
        assert_eq!(record.filename.as_deref(), Some("a.txt"));
        assert_eq!(record.text.as_deref(), Some("note"));
        assert_eq!(reloaded.get("id2").await.unwrap(), UploadRecord::default());
    }

    #[tokio::test]
    async fn test_corrupt_registry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uploads.db");
        tokio::fs::write(&path, b"not json").await.unwrap();
        assert!(UploadRegistry::load(path).await.is_err());
    }
}
