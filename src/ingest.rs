//! Upload Ingest Module
//!
//! Lifecycle coordination for one upload: drives the multipart decoder over
//! the request body, owns the single store writer, records filename and text
//! into the registry, and reconciles the asynchronous flush acknowledgment
//! with end-of-body before declaring the upload complete.
//!
//! Completion is a state-machine transition, not an event-emitter race: the
//! flush acknowledgment is a oneshot the coordinator awaits at end-of-body,
//! so either arrival order converges on exactly one `Complete`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::decoder::{DecodeEvent, MultipartDecoder};
use crate::registry::UploadRegistry;
use crate::storage::{FlushHandle, StoreWriter, UploadStore};
use crate::{Result, UploadError};

/// The one form field name the uploader records; other fields are decoded
/// and discarded.
const TEXT_FIELD: &str = "text";

/// Lifecycle states for one upload ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Receiving,
    AwaitingFlush,
    Complete,
    Failed,
}

/// Shared entry point for starting upload ingestions.
///
/// Holds the registry, the store, and the in-flight guard table that rejects
/// a second concurrent ingestion for the same upload id.
pub struct Ingestor {
    registry: Arc<UploadRegistry>,
    store: Arc<UploadStore>,
    inflight: Arc<DashMap<String, ()>>,
}

impl Ingestor {
    pub fn new(registry: Arc<UploadRegistry>, store: Arc<UploadStore>) -> Self {
        Self {
            registry,
            store,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Begin ingesting one upload.
    ///
    /// Creates the registry record and claims the in-flight slot for the id.
    ///
    /// # Errors
    ///
    /// * `UploadInFlight` - another ingestion for this id is still receiving
    /// * `InvalidRequest` - unusable boundary token
    pub async fn begin(
        &self,
        upload_id: &str,
        content_length: u64,
        boundary_token: &str,
    ) -> Result<UploadIngest> {
        let guard = IngestGuard::try_acquire(Arc::clone(&self.inflight), upload_id)?;
        let decoder = MultipartDecoder::new(boundary_token, content_length)?;

        self.registry.create(upload_id).await;
        info!(
            "Upload ingest started: id={}, declared_length={}",
            upload_id, content_length
        );

        Ok(UploadIngest {
            upload_id: upload_id.to_string(),
            declared_length: content_length,
            decoder,
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            writer: None,
            flush: None,
            filename: None,
            state: IngestState::Receiving,
            started: Instant::now(),
            _guard: guard,
        })
    }
}

/// Coordinator for one in-flight upload.
pub struct UploadIngest {
    upload_id: String,
    declared_length: u64,
    decoder: MultipartDecoder,
    registry: Arc<UploadRegistry>,
    store: Arc<UploadStore>,
    /// At most one open store writer per upload id
    writer: Option<StoreWriter>,
    /// Pending flush acknowledgment for a closed writer
    flush: Option<FlushHandle>,
    filename: Option<String>,
    state: IngestState,
    started: Instant,
    _guard: IngestGuard,
}

/// Result of a completed ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub upload_id: String,
    /// Client-side filename, absent for text-only uploads
    pub filename: Option<String>,
    /// Bytes durably stored, zero when no file fragment arrived
    pub bytes_stored: u64,
    pub elapsed: Duration,
}

impl UploadIngest {
    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Feed one delivered body chunk through the decoder and apply the
    /// resulting events.
    pub async fn feed_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if self.state != IngestState::Receiving {
            return Err(UploadError::SystemError(format!(
                "chunk fed to upload {} in state {:?}",
                self.upload_id, self.state
            )));
        }

        let events = match self.decoder.feed(chunk) {
            Ok(events) => events,
            Err(err) => return Err(self.fail(err).await),
        };

        for event in events {
            if let Err(err) = self.apply(event).await {
                return Err(self.fail(err).await);
            }
        }
        Ok(())
    }

    /// Signal end-of-body and wait, if necessary, for the store flush.
    ///
    /// Exactly one `Complete` transition can occur: this method consumes the
    /// ingest, and the flush acknowledgment is awaited here whether it
    /// arrived before or after the final body chunk.
    pub async fn end_of_body(mut self) -> Result<IngestOutcome> {
        if self.state != IngestState::Receiving {
            return Err(UploadError::SystemError(format!(
                "end of body for upload {} in state {:?}",
                self.upload_id, self.state
            )));
        }

        if let Err(err) = self.decoder.finish() {
            return Err(self.fail(err).await);
        }

        // finish() verified the end marker, so a still-open writer means the
        // decoder and coordinator disagree; treat it as a malformed transfer.
        if self.writer.is_some() {
            return Err(self
                .fail(UploadError::MalformedMultipart(
                    "file fragment never completed".to_string(),
                ))
                .await);
        }

        let bytes_stored = match self.flush.take() {
            Some(handle) => {
                self.state = IngestState::AwaitingFlush;
                debug!("Awaiting store flush: id={}", self.upload_id);
                match handle.wait().await {
                    Ok(bytes) => bytes,
                    Err(err) => return Err(self.fail(err).await),
                }
            }
            None => 0,
        };

        self.state = IngestState::Complete;
        let elapsed = self.started.elapsed();
        let rate_kb_s =
            (self.declared_length as f64 / 1024.0) / elapsed.as_secs_f64().max(0.001);
        info!(
            "Upload {} complete ({:.0} KB/s): filename={:?}, bytes_stored={}",
            self.upload_id, rate_kb_s, self.filename, bytes_stored
        );

        Ok(IngestOutcome {
            upload_id: self.upload_id.clone(),
            filename: self.filename.clone(),
            bytes_stored,
            elapsed,
        })
    }

    async fn apply(&mut self, event: DecodeEvent) -> Result<()> {
        match event {
            DecodeEvent::FileBegin(headers) => {
                // One file per upload is the expected shape, but a second
                // file fragment must not leak the first writer.
                if let Some(previous) = self.writer.take() {
                    warn!(
                        "Replacing open store stream: id={}, discarding previous",
                        self.upload_id
                    );
                    previous.discard().await;
                }

                if let Some(filename) = &headers.filename {
                    self.registry.set_filename(&self.upload_id, filename).await?;
                    self.filename = Some(filename.clone());
                }
                self.writer = Some(self.store.open_writer(&self.upload_id).await?);
            }
            DecodeEvent::FileData(data) => match self.writer.as_mut() {
                Some(writer) => writer.write_chunk(&data).await?,
                None => {
                    return Err(UploadError::SystemError(
                        "file data without an open store stream".to_string(),
                    ))
                }
            },
            DecodeEvent::FileEnd => match self.writer.take() {
                Some(writer) => {
                    self.flush = Some(writer.close_and_flush());
                }
                None => {
                    return Err(UploadError::SystemError(
                        "file end without an open store stream".to_string(),
                    ))
                }
            },
            DecodeEvent::Field { name, value } => {
                if name == TEXT_FIELD {
                    self.registry.set_text(&self.upload_id, value).await?;
                } else {
                    debug!(
                        "Discarding unrecognized field: id={}, name={}",
                        self.upload_id, name
                    );
                }
            }
            DecodeEvent::EndOfTransmission => {
                debug!("End of transmission: id={}", self.upload_id);
            }
        }
        Ok(())
    }

    /// Terminal failure: discard any open writer, log once, pass the error
    /// back up. No transition leaves `Failed`.
    async fn fail(&mut self, err: UploadError) -> UploadError {
        self.state = IngestState::Failed;
        if let Some(writer) = self.writer.take() {
            writer.discard().await;
        }
        // A flush already in flight will still commit its file; wait for it
        // off to the side and remove the orphan of the failed upload.
        if let Some(handle) = self.flush.take() {
            let path = self.store.path_for(&self.upload_id);
            tokio::spawn(async move {
                if handle.wait().await.is_ok() {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(
                            "Failed to remove file of failed upload: path={:?}, error={}",
                            path, e
                        );
                    }
                }
            });
        }
        error!("Upload {} failed: {}", self.upload_id, err);
        err
    }
}

/// RAII claim on an upload id's ingest slot; released on drop so an aborted
/// request never wedges the id.
struct IngestGuard {
    upload_id: String,
    inflight: Arc<DashMap<String, ()>>,
}

impl IngestGuard {
    fn try_acquire(inflight: Arc<DashMap<String, ()>>, upload_id: &str) -> Result<Self> {
        match inflight.entry(upload_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(UploadError::UploadInFlight(upload_id.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(());
            }
        }
        Ok(Self {
            upload_id: upload_id.to_string(),
            inflight,
        })
    }
}

impl Drop for IngestGuard {
    fn drop(&mut self) {
        self.inflight.remove(&self.upload_id);
    }
}
