//! HTTP Gateway Module
//!
//! The hyper-based HTTP front end: serves the upload form and static assets,
//! streams multipart POST bodies into the ingest coordinator frame by frame,
//! and applies text edits to existing upload records. All transfer decoding
//! lives in the decoder and ingest modules; this layer only routes, extracts
//! header parameters, and maps outcomes to responses.

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checksum;
use crate::config::Config;
use crate::ingest::Ingestor;
use crate::registry::UploadRegistry;
use crate::shutdown::ShutdownSignal;
use crate::storage::UploadStore;
use crate::template;
use crate::{Result, UploadError};

type GatewayBody = BoxBody<Bytes, hyper::Error>;

/// HTTP front end for the upload server.
pub struct Gateway {
    config: Config,
    registry: Arc<UploadRegistry>,
    store: Arc<UploadStore>,
    ingestor: Ingestor,
}

impl Gateway {
    pub fn new(config: Config, registry: Arc<UploadRegistry>, store: Arc<UploadStore>) -> Self {
        let ingestor = Ingestor::new(Arc::clone(&registry), Arc::clone(&store));
        Self {
            config,
            registry,
            store,
            ingestor,
        }
    }

    /// Run the accept loop until the shutdown signal fires.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: ShutdownSignal,
    ) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Upload server listening on {}", addr);
        }

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote) = accept_result.map_err(|e| {
                        UploadError::IoError(format!("failed to accept connection: {}", e))
                    })?;

                    let io = TokioIo::new(stream);
                    let gateway = Arc::clone(&self);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let gateway = Arc::clone(&gateway);
                            async move { gateway.handle_request(req).await }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("Error serving connection from {}: {}", remote, e);
                        }
                    });
                }
                _ = shutdown.wait_for_shutdown() => {
                    info!("Upload server received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<GatewayBody>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let result = match method {
            Method::GET => self.handle_get(&path).await,
            Method::POST => self.handle_upload(req, &path).await,
            Method::PUT => self.handle_text_edit(req, &path).await,
            _ => Ok(build_response(
                StatusCode::METHOD_NOT_ALLOWED,
                None,
                Bytes::new(),
            )),
        };

        Ok(result.unwrap_or_else(|err| error_response(&method, &path, &err)))
    }

    async fn handle_get(&self, path: &str) -> Result<Response<GatewayBody>> {
        if path == "/" {
            return self.handle_form().await;
        }
        self.handle_asset(path).await
    }

    /// Render the upload form, stamped with a fresh upload id that links the
    /// form, its POST upload, and any later text edit.
    async fn handle_form(&self) -> Result<Response<GatewayBody>> {
        let template_path = self.config.asset_dir.join("index.html");
        let raw = match tokio::fs::read_to_string(&template_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Upload form template missing: path={:?}", template_path);
                return Ok(build_response(StatusCode::NOT_FOUND, None, Bytes::new()));
            }
            Err(e) => return Err(e.into()),
        };

        let upload_id = Uuid::new_v4().simple().to_string();
        let mut vars = HashMap::new();
        vars.insert("upload-id", upload_id.clone());
        let html = template::render(&raw, &vars);

        debug!("Issued upload form: id={}", upload_id);
        Ok(build_response(
            StatusCode::OK,
            Some("text/html; charset=utf-8"),
            Bytes::from(html),
        ))
    }

    async fn handle_asset(&self, path: &str) -> Result<Response<GatewayBody>> {
        let asset_path = match self.sanitize_asset_path(path) {
            Some(asset_path) => asset_path,
            None => return Ok(build_response(StatusCode::NOT_FOUND, None, Bytes::new())),
        };

        match tokio::fs::read(&asset_path).await {
            Ok(contents) => Ok(build_response(
                StatusCode::OK,
                Some(content_type_for(&asset_path)),
                Bytes::from(contents),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(build_response(StatusCode::NOT_FOUND, None, Bytes::new()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stream a multipart POST body into the ingest coordinator and answer
    /// with the stored file's checksum once the upload completes.
    async fn handle_upload(
        &self,
        req: Request<Incoming>,
        path: &str,
    ) -> Result<Response<GatewayBody>> {
        let upload_id = parse_upload_id(path)?;

        let content_type = header_str(&req, header::CONTENT_TYPE);
        if !content_type.contains("multipart/form-data") {
            return Err(UploadError::InvalidRequest(format!(
                "unsupported content type for upload: {}",
                content_type
            )));
        }
        let boundary_token = parse_boundary_token(&content_type)?;

        let content_length: u64 = header_str(&req, header::CONTENT_LENGTH)
            .parse()
            .map_err(|_| {
                UploadError::InvalidRequest("missing or invalid content-length".to_string())
            })?;

        let wants_plain = header_str(&req, header::ACCEPT) == "text/plain";

        let mut ingest = self
            .ingestor
            .begin(&upload_id, content_length, &boundary_token)
            .await?;

        let mut body = req.into_body();
        while let Some(frame) = body.frame().await {
            let frame = frame?;
            if let Some(data) = frame.data_ref() {
                ingest.feed_chunk(data).await?;
            }
        }

        let outcome = ingest.end_of_body().await?;

        let checksum = match &outcome.filename {
            Some(_) => Some(checksum::sha256_file(&self.store.path_for(&upload_id)).await?),
            None => None,
        };

        if wants_plain {
            return Ok(build_response(
                StatusCode::CREATED,
                Some("text/plain; charset=utf-8"),
                Bytes::from(checksum.unwrap_or_default()),
            ));
        }

        self.success_page(checksum.as_deref()).await
    }

    async fn success_page(&self, checksum: Option<&str>) -> Result<Response<GatewayBody>> {
        let template_path = self.config.asset_dir.join("success.html");
        match tokio::fs::read_to_string(&template_path).await {
            Ok(raw) => {
                let mut vars = HashMap::new();
                vars.insert("checksum", checksum.unwrap_or_default().to_string());
                Ok(build_response(
                    StatusCode::CREATED,
                    Some("text/html; charset=utf-8"),
                    Bytes::from(template::render(&raw, &vars)),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // No success template shipped; the digest alone still serves
                Ok(build_response(
                    StatusCode::CREATED,
                    Some("text/plain; charset=utf-8"),
                    Bytes::from(checksum.unwrap_or_default().to_string()),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a text edit to an existing upload record.
    async fn handle_text_edit(
        &self,
        req: Request<Incoming>,
        path: &str,
    ) -> Result<Response<GatewayBody>> {
        let upload_id = parse_upload_id(path)?;

        if !self.registry.contains(&upload_id).await {
            return Err(UploadError::UnknownUploadId(upload_id));
        }

        let mut data = Vec::new();
        let mut body = req.into_body();
        while let Some(frame) = body.frame().await {
            let frame = frame?;
            if let Some(chunk) = frame.data_ref() {
                if data.len() + chunk.len() > self.config.max_text_body_bytes {
                    return Ok(build_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        None,
                        Bytes::new(),
                    ));
                }
                data.extend_from_slice(chunk);
            }
        }

        let text = String::from_utf8_lossy(&data).into_owned();
        self.registry.set_text(&upload_id, text).await?;

        debug!("Text updated: id={}", upload_id);
        Ok(build_response(StatusCode::OK, None, Bytes::new()))
    }

    fn sanitize_asset_path(&self, path: &str) -> Option<PathBuf> {
        let rel = path.trim_start_matches('/');
        if rel.is_empty() {
            return None;
        }
        let rel_path = Path::new(rel);
        // Only plain path segments; anything else could escape the asset dir
        if rel_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.config.asset_dir.join(rel_path))
    }
}

fn full_body(data: Bytes) -> GatewayBody {
    Full::new(data).map_err(|never| match never {}).boxed()
}

fn build_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: Bytes,
) -> Response<GatewayBody> {
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(full_body(body)).unwrap_or_else(|_| {
        let mut response = Response::new(full_body(Bytes::new()));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

fn error_response(method: &Method, path: &str, err: &UploadError) -> Response<GatewayBody> {
    let status = if err.is_client_error() {
        warn!("Rejected {} {}: {}", method, path, err);
        StatusCode::BAD_REQUEST
    } else {
        error!("Failed {} {}: {}", method, path, err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    build_response(
        status,
        Some("text/plain; charset=utf-8"),
        Bytes::from(err.to_string()),
    )
}

fn header_str(req: &Request<Incoming>, name: header::HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// The upload id is the whole request path after the leading slash. Ids are
/// used as file names under the uploads directory, so path-like ids are
/// rejected outright.
fn parse_upload_id(path: &str) -> Result<String> {
    let upload_id = path.trim_start_matches('/');
    if upload_id.is_empty() || upload_id.contains('/') || upload_id == "." || upload_id == ".." {
        return Err(UploadError::InvalidRequest(format!(
            "invalid upload path: {}",
            path
        )));
    }
    Ok(upload_id.to_string())
}

/// Extract the boundary token from a multipart content-type value.
fn parse_boundary_token(content_type: &str) -> Result<String> {
    content_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("boundary="))
        .map(|token| token.trim_matches('"').to_string())
        .find(|token| !token.is_empty())
        .ok_or_else(|| {
            UploadError::InvalidRequest("multipart content-type without a boundary".to_string())
        })
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boundary_token() {
        let ct = "multipart/form-data; boundary=----WebKitFormBoundaryX3";
        assert_eq!(
            parse_boundary_token(ct).unwrap(),
            "----WebKitFormBoundaryX3"
        );
    }

    #[test]
    fn test_parse_boundary_token_quoted() {
        let ct = "multipart/form-data; boundary=\"abc def\"";
        assert_eq!(parse_boundary_token(ct).unwrap(), "abc def");
    }

    #[test]
    fn test_parse_boundary_token_missing() {
        assert!(parse_boundary_token("multipart/form-data").is_err());
        assert!(parse_boundary_token("multipart/form-data; boundary=").is_err());
    }

    #[test]
    fn test_parse_upload_id() {
        assert_eq!(parse_upload_id("/abc123").unwrap(), "abc123");
        assert!(parse_upload_id("/").is_err());
        assert!(parse_upload_id("/a/b").is_err());
        assert!(parse_upload_id("/..").is_err());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(
            content_type_for(Path::new("index.html")),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            content_type_for(Path::new("blob.bin")),
            "application/octet-stream"
        );
    }
}
