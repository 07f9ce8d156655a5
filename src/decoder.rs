//! Multipart Decoder Module
//!
//! Incremental decoder for `multipart/form-data` request bodies. Chunks are
//! pushed in as they arrive off the wire; the decoder classifies each
//! fragment as file content or field content and emits decode events without
//! ever buffering a whole file fragment in memory.
//!
//! Delivered chunk edges carry no meaning: the decoder keeps a bounded
//! lookback window between feeds so a fragment delimiter that straddles two
//! chunks is still found. Correctness holds for arbitrary chunkings of the
//! same body.

use bytes::{Buf, Bytes, BytesMut};

use crate::boundary;
use crate::fragment::{parse_fragment_headers, FragmentHeaders};
use crate::{Result, UploadError};

/// Events emitted while decoding a request body, in body order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A file fragment's headers were parsed; its content follows.
    FileBegin(FragmentHeaders),
    /// A run of file content bytes, in arrival order.
    FileData(Bytes),
    /// The open file fragment's content is complete.
    FileEnd,
    /// A field fragment completed with its full text value.
    Field { name: String, value: String },
    /// The end-of-transmission marker was seen; no fragments follow.
    EndOfTransmission,
}

/// Decoder position within the multipart grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CursorState {
    /// Expecting the leading boundary at the very start of the body
    LeadingBoundary,
    /// A boundary was just consumed; next is CRLF + headers or the end marker
    AfterBoundary,
    /// Accumulating a fragment's header block up to the blank line
    Headers,
    /// Scanning fragment content for the next delimiter
    Content(FragmentHeaders),
    /// End marker seen; remaining bytes are ignored
    Epilogue,
}

/// Incremental push decoder for one request body.
///
/// Holds the transient per-request cursor: the active delimiter, the current
/// fragment's headers, buffered bytes not yet classified, and the cumulative
/// byte count checked against the declared content length.
pub struct MultipartDecoder {
    /// Delimiter byte sequence: `--` + boundary token
    delimiter: Vec<u8>,
    /// Bytes retained across feeds so a split delimiter is still found
    lookback: usize,
    /// Declared content length of the request body
    expected: u64,
    /// Cumulative bytes fed so far
    received: u64,
    state: CursorState,
    buf: BytesMut,
    saw_end: bool,
}

impl MultipartDecoder {
    /// Create a decoder for one request.
    ///
    /// # Arguments
    ///
    /// * `boundary_token` - the boundary parameter from the content-type
    ///   header, without the `--` prefix
    /// * `expected_length` - the declared content length of the body
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the boundary token is empty.
    pub fn new(boundary_token: &str, expected_length: u64) -> Result<Self> {
        if boundary_token.is_empty() {
            return Err(UploadError::InvalidRequest(
                "empty multipart boundary token".to_string(),
            ));
        }

        let delimiter = format!("--{}", boundary_token).into_bytes();
        let lookback = delimiter.len() + 2;

        Ok(Self {
            delimiter,
            lookback,
            expected: expected_length,
            received: 0,
            state: CursorState::LeadingBoundary,
            buf: BytesMut::new(),
            saw_end: false,
        })
    }

    /// Cumulative bytes fed so far.
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Whether the end-of-transmission marker has been decoded.
    pub fn is_complete(&self) -> bool {
        self.saw_end
    }

    /// Consume one delivered body chunk and return the events it produced.
    ///
    /// # Errors
    ///
    /// * `MalformedLeadingBoundary` - the body does not begin with the
    ///   boundary token
    /// * `MalformedMultipart` - structurally invalid fragment headers or
    ///   delimiter framing
    /// * `LengthMismatch` - more bytes delivered than the declared length
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<DecodeEvent>> {
        self.received += chunk.len() as u64;
        if self.received > self.expected {
            return Err(UploadError::LengthMismatch {
                expected: self.expected,
                actual: self.received,
            });
        }

        let mut events = Vec::new();

        // Bytes after the end marker are epilogue; they count toward the
        // declared length but are otherwise ignored.
        if self.state == CursorState::Epilogue {
            return Ok(events);
        }

        self.buf.extend_from_slice(chunk);

        loop {
            let advanced = match self.state {
                CursorState::LeadingBoundary => self.on_leading_boundary()?,
                CursorState::AfterBoundary => self.on_after_boundary(&mut events)?,
                CursorState::Headers => self.on_headers(&mut events)?,
                CursorState::Content(_) => self.on_content(&mut events)?,
                CursorState::Epilogue => break,
            };
            if !advanced {
                break;
            }
        }

        Ok(events)
    }

    /// Signal end-of-body and verify the transfer was complete.
    ///
    /// # Errors
    ///
    /// * `LengthMismatch` - delivered bytes differ from the declared length
    /// * `MalformedMultipart` - the body ended without an end marker
    pub fn finish(&self) -> Result<()> {
        if self.received != self.expected {
            return Err(UploadError::LengthMismatch {
                expected: self.expected,
                actual: self.received,
            });
        }
        if !self.saw_end {
            return Err(UploadError::MalformedMultipart(
                "body ended before the end-of-transmission marker".to_string(),
            ));
        }
        Ok(())
    }

    /// The body must open with the delimiter, with no preceding CRLF.
    /// Matched incrementally so an arbitrarily small first chunk still
    /// fails fast on the first wrong byte.
    fn on_leading_boundary(&mut self) -> Result<bool> {
        let want = self.delimiter.len();
        let have = self.buf.len().min(want);

        if self.buf[..have] != self.delimiter[..have] {
            return Err(UploadError::MalformedLeadingBoundary(
                "body does not start with the boundary token".to_string(),
            ));
        }
        if have < want {
            return Ok(false);
        }

        self.buf.advance(want);
        self.state = CursorState::AfterBoundary;
        Ok(true)
    }

    /// Immediately after a delimiter: either the `--` end marker or the CRLF
    /// that opens the next fragment's headers.
    fn on_after_boundary(&mut self, events: &mut Vec<DecodeEvent>) -> Result<bool> {
        if self.buf.len() < 2 {
            return Ok(false);
        }

        if boundary::is_end_marker(&self.buf, 0) {
            self.buf.clear();
            self.saw_end = true;
            self.state = CursorState::Epilogue;
            events.push(DecodeEvent::EndOfTransmission);
            return Ok(true);
        }

        if self.buf[0] == boundary::CR && self.buf[1] == boundary::LF {
            self.buf.advance(2);
            self.state = CursorState::Headers;
            return Ok(true);
        }

        Err(UploadError::MalformedMultipart(
            "expected CRLF or end marker after boundary".to_string(),
        ))
    }

    /// Accumulate header bytes until the blank line, then classify the
    /// fragment from its parsed headers.
    fn on_headers(&mut self, events: &mut Vec<DecodeEvent>) -> Result<bool> {
        match boundary::find_blank_line(&self.buf, 0) {
            Some(pos) => {
                let block = self.buf.split_to(pos + 4);
                let headers = parse_fragment_headers(&block[..pos])?;
                if headers.is_file() {
                    events.push(DecodeEvent::FileBegin(headers.clone()));
                }
                self.state = CursorState::Content(headers);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Scan content for the next delimiter. File content that cannot yet be
    /// part of a delimiter is released immediately; field content stays
    /// buffered until the fragment completes.
    fn on_content(&mut self, events: &mut Vec<DecodeEvent>) -> Result<bool> {
        let is_file = matches!(&self.state, CursorState::Content(h) if h.is_file());

        match boundary::find_boundary(&self.buf, &self.delimiter, 0) {
            Some(pos) => {
                let content = self.buf.split_to(pos).freeze();
                self.buf.advance(2 + self.delimiter.len());

                let prev = std::mem::replace(&mut self.state, CursorState::AfterBoundary);
                if let CursorState::Content(headers) = prev {
                    if headers.is_file() {
                        if !content.is_empty() {
                            events.push(DecodeEvent::FileData(content));
                        }
                        events.push(DecodeEvent::FileEnd);
                    } else {
                        events.push(DecodeEvent::Field {
                            name: headers.name,
                            value: String::from_utf8_lossy(&content).into_owned(),
                        });
                    }
                }
                Ok(true)
            }
            None => {
                // No delimiter in the window. Everything except the lookback
                // tail is settled content; a delimiter starting inside the
                // tail will be completed by a later feed.
                if is_file && self.buf.len() > self.lookback {
                    let release = self.buf.split_to(self.buf.len() - self.lookback).freeze();
                    events.push(DecodeEvent::FileData(release));
                }
                Ok(false)
            }
        }
    }
}
