//! Error Module
//!
//! Defines error types and result types used throughout the upload server.

use thiserror::Error;

/// Main error type for the upload server
#[derive(Error, Debug, Clone)]
pub enum UploadError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The first body chunk did not begin with the multipart boundary token.
    #[error("Malformed leading boundary: {0}")]
    MalformedLeadingBoundary(String),

    /// Structurally invalid multipart content past the leading boundary.
    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    /// Bytes delivered for a request did not match its declared content length.
    #[error("Body length mismatch: expected {expected} bytes, got {actual} bytes")]
    LengthMismatch { expected: u64, actual: u64 },

    /// An operation referenced an upload id with no registry entry.
    #[error("Unknown upload id: {0}")]
    UnknownUploadId(String),

    /// The storage backend reported a write or flush error.
    #[error("Storage write failure: {0}")]
    StorageWriteFailure(String),

    /// A second ingestion was attempted for an upload id that is still receiving.
    #[error("Upload already in flight: {0}")]
    UploadInFlight(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("System error: {0}")]
    SystemError(String),
}

impl UploadError {
    /// Whether this error is the client's fault and maps to a 4xx status.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            UploadError::MalformedLeadingBoundary(_)
                | UploadError::MalformedMultipart(_)
                | UploadError::UnknownUploadId(_)
                | UploadError::UploadInFlight(_)
                | UploadError::InvalidRequest(_)
        )
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::IoError(err.to_string())
    }
}

impl From<hyper::Error> for UploadError {
    fn from(err: hyper::Error) -> Self {
        UploadError::HttpError(err.to_string())
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        UploadError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for UploadError {
    fn from(err: serde_yaml::Error) -> Self {
        UploadError::SerializationError(err.to_string())
    }
}

/// Result type alias for the upload server
pub type Result<T> = std::result::Result<T, UploadError>;
