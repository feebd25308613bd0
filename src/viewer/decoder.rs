//! Incremental `multipart/x-mixed-replace` splitter
//!
//! Parts are delimited by `--boundary` followed by headers. A part's body
//! length comes from its `Content-Length` header; parts without one are
//! located by scanning for the JPEG start (`FF D8`) and end (`FF D9`)
//! markers. Without a boundary the whole stream is scanned for JPEGs.

use bytes::{Bytes, BytesMut};

/// Buffered bytes are dropped past this size without a complete part
pub const MAX_BUFFERED: usize = 16 * 1024 * 1024;

const HEADER_END: &[u8] = b"\r\n\r\n";
const JPEG_SOI: &[u8] = &[0xFF, 0xD8];
const JPEG_EOI: &[u8] = &[0xFF, 0xD9];

#[derive(Debug)]
pub struct MultipartDecoder {
    delimiter: Option<Vec<u8>>,
    buffer: BytesMut,
}

impl MultipartDecoder {
    /// Decoder for `boundary`, or a plain JPEG scanner when `None`
    pub fn new(boundary: Option<&str>) -> Self {
        Self {
            delimiter: boundary.map(|b| format!("--{}", b).into_bytes()),
            buffer: BytesMut::new(),
        }
    }

    /// Decoder for the boundary named in a `Content-Type` header value
    pub fn from_content_type(content_type: &str) -> Self {
        Self::new(boundary_of(content_type).as_deref())
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.buffer.len() + chunk.len() > MAX_BUFFERED {
            tracing::warn!(buffered = self.buffer.len(), "No multipart part found, dropping buffer");
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete part body, if buffered
    pub fn next_part(&mut self) -> Option<Bytes> {
        match self.delimiter.clone() {
            Some(delimiter) => self.next_delimited(&delimiter),
            None => self.next_jpeg(0),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn next_delimited(&mut self, delimiter: &[u8]) -> Option<Bytes> {
        let start = find(&self.buffer, delimiter)?;
        let headers_start = start + delimiter.len();
        let headers_len = find(&self.buffer[headers_start..], HEADER_END)?;
        let body_start = headers_start + headers_len + HEADER_END.len();

        match content_length(&self.buffer[headers_start..headers_start + headers_len]) {
            Some(len) => {
                if self.buffer.len() < body_start + len {
                    return None;
                }
                let _ = self.buffer.split_to(body_start);
                Some(self.buffer.split_to(len).freeze())
            }
            None => self.next_jpeg(body_start),
        }
    }

    fn next_jpeg(&mut self, from: usize) -> Option<Bytes> {
        let soi = from + find(&self.buffer[from..], JPEG_SOI)?;
        let eoi = soi + JPEG_SOI.len() + find(&self.buffer[soi + JPEG_SOI.len()..], JPEG_EOI)?;
        let end = eoi + JPEG_EOI.len();

        let _ = self.buffer.split_to(soi);
        Some(self.buffer.split_to(end - soi).freeze())
    }
}

/// `boundary` parameter of a multipart content type
pub fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            // Some servers repeat the leading dashes in the parameter
            let value = value.strip_prefix("--").unwrap_or(value);
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

fn content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers).split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
