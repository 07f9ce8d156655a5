//! Registry persistence tests: records written by a full ingest survive a
//! persist/reload cycle, and the text edit path behaves on the reloaded
//! registry.

use std::sync::Arc;

use filedrop::ingest::Ingestor;
use filedrop::registry::UploadRegistry;
use filedrop::storage::UploadStore;
use filedrop::UploadError;
use tempfile::TempDir;

fn upload_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"--sep\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"report.pdf\"\r\n\r\n",
    );
    body.extend_from_slice(b"%PDF-1.4 pretend");
    body.extend_from_slice(b"\r\n--sep\r\n");
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"text\"\r\n\r\n");
    body.extend_from_slice(b"quarterly report");
    body.extend_from_slice(b"\r\n--sep--\r\n");
    body
}

#[tokio::test]
async fn test_ingested_records_survive_reload() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("uploads.db");

    {
        let registry = Arc::new(UploadRegistry::load(db_path.clone()).await.unwrap());
        let store = Arc::new(UploadStore::new(dir.path().join("uploads")).await.unwrap());
        let ingestor = Ingestor::new(Arc::clone(&registry), store);

        let body = upload_body();
        let mut ingest = ingestor
            .begin("report-1", body.len() as u64, "sep")
            .await
            .unwrap();
        ingest.feed_chunk(&body).await.unwrap();
        ingest.end_of_body().await.unwrap();

        registry.persist().await.unwrap();
    }

    let reloaded = UploadRegistry::load(db_path).await.unwrap();
    let record = reloaded.get("report-1").await.unwrap();
    assert_eq!(record.filename.as_deref(), Some("report.pdf"));
    assert_eq!(record.text.as_deref(), Some("quarterly report"));
}

#[tokio::test]
async fn test_text_edit_on_reloaded_registry() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("uploads.db");

    {
        let registry = UploadRegistry::load(db_path.clone()).await.unwrap();
        registry.create("editable").await;
        registry.persist().await.unwrap();
    }

    let reloaded = UploadRegistry::load(db_path.clone()).await.unwrap();
    reloaded
        .set_text("editable", "updated later".to_string())
        .await
        .unwrap();
    reloaded.persist().await.unwrap();

    let again = UploadRegistry::load(db_path).await.unwrap();
    assert_eq!(
        again.get("editable").await.unwrap().text.as_deref(),
        Some("updated later")
    );
}

#[tokio::test]
async fn test_text_edit_unknown_id_rejected() {
    let dir = TempDir::new().unwrap();
    let registry = UploadRegistry::load(dir.path().join("uploads.db"))
        .await
        .unwrap();
    let err = registry
        .set_text("never-created", "x".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::UnknownUploadId(_)));
}

#[tokio::test]
async fn test_persisted_file_is_plain_json() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("uploads.db");

    let registry = UploadRegistry::load(db_path.clone()).await.unwrap();
    registry.create("json-check").await;
    registry
        .set_text("json-check", "hello".to_string())
        .await
        .unwrap();
    registry.persist().await.unwrap();

    let raw = tokio::fs::read(&db_path).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(parsed["json-check"]["text"], "hello");
}
