//! filedrop - Streaming multipart file-upload server
//!
//! This library provides the core functionality for the upload server: an
//! incremental multipart decoder that streams file content to disk as it
//! arrives off the wire, the upload lifecycle coordination around it, and
//! the HTTP, registry, and storage layers that surround them.

pub mod boundary;
pub mod checksum;
pub mod config;
pub mod decoder;
pub mod error;
pub mod fragment;
pub mod gateway;
pub mod ingest;
pub mod logging;
pub mod registry;
pub mod shutdown;
pub mod storage;
pub mod template;

pub use error::{Result, UploadError};
