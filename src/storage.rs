//! Storage Module
//!
//! Streaming write functionality for uploaded files. Each upload is written
//! to a temporary file and atomically renamed into place once fully flushed,
//! so a crashed or aborted transfer never leaves a partial file at the final
//! path.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::{Result, UploadError};

/// Store for uploaded files, rooted at the configured uploads directory.
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Create the store, ensuring the uploads directory exists.
    pub async fn new(root: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            error!("Failed to create uploads directory: path={:?}, error={}", root, e);
            UploadError::StorageWriteFailure(format!("failed to create uploads directory: {}", e))
        })?;
        Ok(Self { root })
    }

    /// Final on-disk path for an upload id.
    pub fn path_for(&self, upload_id: &str) -> PathBuf {
        self.root.join(upload_id)
    }

    /// Open a streaming writer for an upload id.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailure` if the temporary file cannot be created.
    pub async fn open_writer(&self, upload_id: &str) -> Result<StoreWriter> {
        let final_path = self.path_for(upload_id);
        // Append rather than set_extension: an upload id may itself contain
        // a dot, and two distinct ids must never share a temp path
        let temp_path = {
            let mut name = final_path.clone().into_os_string();
            name.push(".part");
            PathBuf::from(name)
        };

        debug!(
            "Opening store writer: final_path={:?}, temp_path={:?}",
            final_path, temp_path
        );

        let temp_file = File::create(&temp_path).await.map_err(|e| {
            error!(
                "Failed to create temporary upload file: path={:?}, error={}",
                temp_path, e
            );
            UploadError::StorageWriteFailure(format!("failed to create temporary file: {}", e))
        })?;

        Ok(StoreWriter {
            temp_file: Some(temp_file),
            temp_path,
            final_path,
            bytes_written: 0,
            finalized: false,
        })
    }
}

/// Streaming writer for one upload.
///
/// Writes go to a temporary file; `close_and_flush` flushes, syncs, and
/// renames to the final path asynchronously and resolves the returned
/// [`FlushHandle`] when the bytes are durable.
pub struct StoreWriter {
    temp_file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
    finalized: bool,
}

impl StoreWriter {
    /// Append a run of content bytes.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailure` if the write fails or the writer has
    /// already been finalized.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let file = match self.temp_file.as_mut() {
            Some(file) if !self.finalized => file,
            _ => {
                return Err(UploadError::StorageWriteFailure(
                    "write to finalized store writer".to_string(),
                ))
            }
        };

        file.write_all(data).await.map_err(|e| {
            error!(
                "Failed to write upload data: path={:?}, error={}",
                self.temp_path, e
            );
            UploadError::StorageWriteFailure(format!("failed to write upload data: {}", e))
        })?;

        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Total content bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Close the writer and flush asynchronously.
    ///
    /// The flush, sync, and rename run in a background task so the caller's
    /// event loop is never blocked; the returned handle resolves once the
    /// file is durable at its final path. The acknowledgment may arrive
    /// before or after the caller sees end-of-body.
    pub fn close_and_flush(mut self) -> FlushHandle {
        let (tx, rx) = oneshot::channel();

        self.finalized = true;
        let file = self.temp_file.take();
        let temp_path = self.temp_path.clone();
        let final_path = self.final_path.clone();
        let bytes_written = self.bytes_written;

        tokio::spawn(async move {
            let result = flush_and_commit(file, &temp_path, &final_path, bytes_written).await;
            if let Err(err) = &result {
                error!("Upload flush failed: path={:?}, error={}", final_path, err);
            }
            // The receiver may already be gone if the request was aborted
            let _ = tx.send(result);
        });

        FlushHandle { receiver: rx }
    }

    /// Abandon the writer and remove its temporary file.
    pub async fn discard(mut self) {
        self.finalized = true;
        self.temp_file.take();
        if let Err(e) = tokio::fs::remove_file(&self.temp_path).await {
            warn!(
                "Failed to remove discarded temp file: path={:?}, error={}",
                self.temp_path, e
            );
        }
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        // An unfinalized writer means the transfer failed mid-file; the
        // temporary file must not linger.
        if !self.finalized {
            self.temp_file.take();
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                warn!(
                    "Failed to clean up temp file on drop: path={:?}, error={}",
                    self.temp_path, e
                );
            }
        }
    }
}

async fn flush_and_commit(
    file: Option<File>,
    temp_path: &Path,
    final_path: &Path,
    bytes_written: u64,
) -> Result<u64> {
    let mut file = file.ok_or_else(|| {
        UploadError::StorageWriteFailure("store writer had no open file".to_string())
    })?;

    file.flush().await.map_err(|e| {
        UploadError::StorageWriteFailure(format!("failed to flush upload: {}", e))
    })?;
    file.sync_all().await.map_err(|e| {
        UploadError::StorageWriteFailure(format!("failed to sync upload: {}", e))
    })?;
    drop(file);

    tokio::fs::rename(temp_path, final_path).await.map_err(|e| {
        UploadError::StorageWriteFailure(format!("failed to commit upload file: {}", e))
    })?;

    debug!(
        "Upload flushed: path={:?}, bytes={}",
        final_path, bytes_written
    );
    Ok(bytes_written)
}

/// Pending flush acknowledgment for a closed writer.
pub struct FlushHandle {
    receiver: oneshot::Receiver<Result<u64>>,
}

impl FlushHandle {
    /// Wait for the flush to complete, returning the flushed byte count.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailure` if the flush failed or the flush task
    /// was lost.
    pub async fn wait(self) -> Result<u64> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(UploadError::StorageWriteFailure(
                "flush task dropped without reporting".to_string(),
            )),
        }
    }
}
