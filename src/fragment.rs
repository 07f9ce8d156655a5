//! Fragment Header Module
//!
//! Parses the header block of a multipart fragment into [`FragmentHeaders`].
//! Only the `Content-Disposition` line is meaningful to the uploader; other
//! header lines (e.g. a per-part `Content-Type`) are skipped.

use crate::{Result, UploadError};

/// Parsed `Content-Disposition` values for one multipart fragment.
///
/// Derived fresh per fragment and never persisted. The presence of
/// `filename` is what classifies a fragment as file content rather than an
/// ordinary form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHeaders {
    /// Disposition kind, e.g. `form-data`
    pub disposition: String,
    /// Form field name
    pub name: String,
    /// Original client-side filename, present only for file fragments
    pub filename: Option<String>,
}

impl FragmentHeaders {
    /// Whether this fragment carries file content.
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

/// Parse a fragment's header block (the bytes between the boundary line and
/// the blank line, excluding both).
///
/// # Errors
///
/// Returns `MalformedMultipart` if no `Content-Disposition` line is present
/// or the disposition carries no `name` parameter.
pub fn parse_fragment_headers(block: &[u8]) -> Result<FragmentHeaders> {
    let text = String::from_utf8_lossy(block);

    for line in text.split("\r\n") {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-disposition") {
                return parse_disposition(value.trim());
            }
        }
    }

    Err(UploadError::MalformedMultipart(
        "fragment headers missing content-disposition".to_string(),
    ))
}

/// Parse a disposition value like `form-data; name="text"; filename="a.txt"`.
fn parse_disposition(value: &str) -> Result<FragmentHeaders> {
    let mut parts = value.split(';');

    let disposition = parts
        .next()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let mut name = None;
    let mut filename = None;

    for part in parts {
        if let Some((key, val)) = part.split_once('=') {
            let val = val.trim().trim_matches('"').to_string();
            match key.trim() {
                "name" => name = Some(val),
                "filename" => filename = Some(val),
                _ => {}
            }
        }
    }

    let name = name.ok_or_else(|| {
        UploadError::MalformedMultipart(format!(
            "content-disposition without a name parameter: {}",
            value
        ))
    })?;

    Ok(FragmentHeaders {
        disposition,
        name,
        filename,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_fragment() {
        let block = b"Content-Disposition: form-data; name=\"text\"";
        let headers = parse_fragment_headers(block).unwrap();
        assert_eq!(headers.disposition, "form-data");
        assert_eq!(headers.name, "text");
        assert_eq!(headers.filename, None);
        assert!(!headers.is_file());
    }

    #[test]
    fn test_parse_file_fragment() {
        let block = b"Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"";
        let headers = parse_fragment_headers(block).unwrap();
        assert_eq!(headers.name, "file");
        assert_eq!(headers.filename.as_deref(), Some("a.txt"));
        assert!(headers.is_file());
    }

    #[test]
    fn test_parse_skips_other_header_lines() {
        let block = b"Content-Disposition: form-data; name=\"file\"; filename=\"b.bin\"\r\nContent-Type: application/octet-stream";
        let headers = parse_fragment_headers(block).unwrap();
        assert_eq!(headers.filename.as_deref(), Some("b.bin"));
    }

    #[test]
    fn test_parse_case_insensitive_header_name() {
        let block = b"content-disposition: form-data; name=\"text\"";
        assert!(parse_fragment_headers(block).is_ok());
    }

    #[test]
    fn test_missing_content_disposition_is_rejected() {
        let block = b"Content-Type: text/plain";
        assert!(matches!(
            parse_fragment_headers(block),
            Err(UploadError::MalformedMultipart(_))
        ));
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let block = b"Content-Disposition: form-data; filename=\"a.txt\"";
        assert!(matches!(
            parse_fragment_headers(block),
            Err(UploadError::MalformedMultipart(_))
        ));
    }
}
