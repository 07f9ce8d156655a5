//! Checksum Module
//!
//! Computes the SHA-256 digest of a stored upload by streaming the file,
//! invoked only after an upload has fully flushed. Runs as an ordinary
//! async task so it never blocks ingestion.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::{Result, UploadError};

/// Read buffer size for digest computation (64 KB).
const DIGEST_BUF_SIZE: usize = 64 * 1024;

/// Compute the hex-encoded SHA-256 digest of a file.
///
/// # Errors
///
/// Returns `IoError` if the file cannot be opened or read.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        UploadError::IoError(format!("failed to open {:?} for checksum: {}", path, e))
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| {
            UploadError::IoError(format!("failed to read {:?} for checksum: {}", path, e))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sha256_of_known_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        tokio::fs::write(&path, b"HELLO").await.unwrap();

        let digest = sha256_file(&path).await.unwrap();
        // sha256("HELLO")
        assert_eq!(
            digest,
            "3733cd977ff8eb18b987357e22ced99f46097f31ecb239e878ae63760e83e4d5"
        );
    }

    #[tokio::test]
    async fn test_sha256_of_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        tokio::fs::write(&path, b"").await.unwrap();

        let digest = sha256_file(&path).await.unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(sha256_file(&dir.path().join("absent")).await.is_err());
    }
}
