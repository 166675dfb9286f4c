//! HTTP/1.x request framing.
//!
//! # Responsibilities
//! - Parse a request head (request line and headers) with `httparse`
//! - Decide how the body is delimited (none, Content-Length, chunked)
//! - Parse chunk-size lines
//!
//! # Design Decisions
//! - Pure functions over byte slices; the extractor owns all I/O
//! - Ambiguous framing (conflicting lengths, unknown transfer codings) is
//!   malformed, since guessing would desynchronise the rest of the flow

use std::io;

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use thiserror::Error;

/// Largest accepted request head.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;
/// Most headers accepted in one request.
pub const MAX_HEADERS: usize = 128;
/// Largest accepted body, after de-chunking.
pub const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;
/// Longest chunk-size or trailer line.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum HttpParseError {
    #[error("malformed request head: {0}")]
    Head(#[from] httparse::Error),

    #[error("request head larger than {} bytes", MAX_HEAD_BYTES)]
    HeadTooLarge,

    #[error("invalid method")]
    InvalidMethod,

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    #[error("invalid or conflicting Content-Length")]
    InvalidContentLength,

    #[error("unsupported transfer coding {0:?}")]
    UnsupportedTransferCoding(String),

    #[error("body larger than {} bytes", MAX_BODY_BYTES)]
    BodyTooLarge,

    #[error("malformed chunked body: {0}")]
    Chunked(&'static str),

    #[error("stream ended inside a message")]
    UnexpectedEof,

    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),
}

impl HttpParseError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HttpParseError::Head(_)
            | HttpParseError::InvalidMethod
            | HttpParseError::InvalidHeader(_) => "head",
            HttpParseError::HeadTooLarge | HttpParseError::BodyTooLarge => "too_large",
            HttpParseError::InvalidContentLength
            | HttpParseError::UnsupportedTransferCoding(_)
            | HttpParseError::Chunked(_) => "framing",
            HttpParseError::UnexpectedEof => "truncated",
            HttpParseError::Io(_) => "io",
        }
    }
}

/// Request line and headers of one message.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

/// How the body of a request is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    Length(u64),
    Chunked,
}

/// Try to parse a request head from the start of `buf`.
///
/// Returns the head and its length in bytes, or `None` if more data is needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, HttpParseError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut slots);

    let len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => {
            if buf.len() > MAX_HEAD_BYTES {
                return Err(HttpParseError::HeadTooLarge);
            }
            return Ok(None);
        }
    };
    if len > MAX_HEAD_BYTES {
        return Err(HttpParseError::HeadTooLarge);
    }

    let method = req
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(HttpParseError::InvalidMethod)?;
    let target = req.path.unwrap_or("/").to_string();
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut headers = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HttpParseError::InvalidHeader(header.name.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HttpParseError::InvalidHeader(header.name.to_string()))?;
        headers.append(name, value);
    }

    Ok(Some((
        RequestHead {
            method,
            target,
            version,
            headers,
        },
        len,
    )))
}

/// Determine body framing from the request headers.
pub fn body_kind(headers: &HeaderMap) -> Result<BodyKind, HttpParseError> {
    let codings: Vec<String> = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .map(|v| v.to_str().map_err(|_| HttpParseError::UnsupportedTransferCoding(String::new())))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flat_map(|v| v.split(','))
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    if let Some(last) = codings.last() {
        if last == "chunked" {
            return Ok(BodyKind::Chunked);
        }
        return Err(HttpParseError::UnsupportedTransferCoding(last.clone()));
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let value = value.to_str().map_err(|_| HttpParseError::InvalidContentLength)?;
        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(HttpParseError::InvalidContentLength);
            }
            let n: u64 = part.parse().map_err(|_| HttpParseError::InvalidContentLength)?;
            match length {
                Some(existing) if existing != n => return Err(HttpParseError::InvalidContentLength),
                _ => length = Some(n),
            }
        }
    }

    match length {
        Some(0) | None => Ok(BodyKind::None),
        Some(n) if n > MAX_BODY_BYTES => Err(HttpParseError::BodyTooLarge),
        Some(n) => Ok(BodyKind::Length(n)),
    }
}

/// Parse a chunk-size line (without its line ending), ignoring extensions.
pub fn parse_chunk_size(line: &[u8]) -> Result<u64, HttpParseError> {
    let size = line.split(|&b| b == b';').next().unwrap_or(&[]);
    let size = std::str::from_utf8(size)
        .map_err(|_| HttpParseError::Chunked("chunk size is not text"))?
        .trim();
    if size.is_empty() {
        return Err(HttpParseError::Chunked("missing chunk size"));
    }
    u64::from_str_radix(size, 16).map_err(|_| HttpParseError::Chunked("invalid chunk size"))
}
