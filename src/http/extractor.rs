//! Per-flow request extraction.
//!
//! # Responsibilities
//! - Read complete HTTP/1.x requests, back to back, from one reassembled stream
//! - Hand every request to the [`RequestHandler`] in wire order
//! - Stop cleanly at end-of-data, or with a logged error on malformed input
//!
//! # Design Decisions
//! - One extractor per flow, run on its own task; extractors share nothing
//! - The handler must not block: it spawns whatever work the request needs
//! - Returning drops the reader, which tells the reassembler to release the flow

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::http::framing::{
    self, BodyKind, HttpParseError, MAX_BODY_BYTES, MAX_HEAD_BYTES, MAX_LINE_BYTES,
};
use crate::http::request::CapturedRequest;
use crate::observability::metrics;
use crate::reassembly::FlowMeta;

const READ_CHUNK: usize = 8 * 1024;

/// Receives every request extracted from a flow.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: CapturedRequest);
}

/// Extracts requests from one flow's byte stream.
pub struct Extractor<R> {
    reader: R,
    buf: BytesMut,
    flow: FlowMeta,
    eof: bool,
}

impl<R: AsyncRead + Unpin> Extractor<R> {
    pub fn new(reader: R, flow: FlowMeta) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
            flow,
            eof: false,
        }
    }

    /// Run until the stream ends or turns out malformed.
    ///
    /// Returns the number of requests handed to `handler`.
    pub async fn run<H: RequestHandler + ?Sized>(mut self, handler: &H) -> usize {
        let mut extracted = 0;
        loop {
            match self.next_request().await {
                Ok(Some(request)) => {
                    extracted += 1;
                    metrics::record_request_extracted();
                    tracing::trace!(
                        flow = %self.flow,
                        method = %request.method,
                        target = %request.target,
                        "Request extracted"
                    );
                    handler.handle(request);
                }
                Ok(None) => {
                    tracing::debug!(flow = %self.flow, extracted, "Flow stream ended");
                    return extracted;
                }
                Err(e) => {
                    metrics::record_extract_error(e.kind());
                    tracing::warn!(
                        flow = %self.flow,
                        extracted,
                        error = %e,
                        "Abandoning flow after unreadable request"
                    );
                    return extracted;
                }
            }
        }
    }

    /// Read the next complete request.
    ///
    /// `Ok(None)` means the stream ended between messages.
    pub async fn next_request(&mut self) -> Result<Option<CapturedRequest>, HttpParseError> {
        let head = loop {
            self.skip_blank_lines();
            if !self.buf.is_empty() {
                if let Some((head, len)) = framing::parse_head(&self.buf)? {
                    self.buf.advance(len);
                    break head;
                }
            }
            if self.fill().await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(HttpParseError::UnexpectedEof)
                };
            }
        };

        let body = match framing::body_kind(&head.headers)? {
            BodyKind::None => Bytes::new(),
            BodyKind::Length(len) => self.read_exact(len as usize).await?,
            BodyKind::Chunked => self.read_chunked().await?,
        };

        Ok(Some(CapturedRequest {
            method: head.method,
            target: head.target,
            version: head.version,
            headers: head.headers,
            body,
            flow: self.flow,
        }))
    }

    async fn fill(&mut self) -> Result<usize, HttpParseError> {
        if self.eof {
            return Ok(0);
        }
        self.buf.reserve(READ_CHUNK);
        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Drop CR/LF between messages (clients may send a stray CRLF after a body).
    fn skip_blank_lines(&mut self) {
        let blank = self
            .buf
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        self.buf.advance(blank);
    }

    async fn read_exact(&mut self, len: usize) -> Result<Bytes, HttpParseError> {
        while self.buf.len() < len {
            if self.fill().await? == 0 {
                return Err(HttpParseError::UnexpectedEof);
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    /// One line without its terminator; a bare LF is accepted.
    async fn read_line(&mut self) -> Result<Bytes, HttpParseError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                return Ok(line.freeze());
            }
            if self.buf.len() > MAX_LINE_BYTES {
                return Err(HttpParseError::Chunked("line too long"));
            }
            if self.fill().await? == 0 {
                return Err(HttpParseError::UnexpectedEof);
            }
        }
    }

    async fn read_chunked(&mut self) -> Result<Bytes, HttpParseError> {
        let mut body = BytesMut::new();
        loop {
            let size = framing::parse_chunk_size(&self.read_line().await?)?;
            if size == 0 {
                break;
            }
            if body.len() as u64 + size > MAX_BODY_BYTES {
                return Err(HttpParseError::BodyTooLarge);
            }

            let chunk = self.read_exact(size as usize).await?;
            body.extend_from_slice(&chunk);
            if !self.read_line().await?.is_empty() {
                return Err(HttpParseError::Chunked("chunk data not followed by CRLF"));
            }
        }

        // Trailers are discarded.
        let mut trailer_bytes = 0;
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                break;
            }
            trailer_bytes += line.len();
            if trailer_bytes > MAX_HEAD_BYTES {
                return Err(HttpParseError::HeadTooLarge);
            }
        }

        Ok(body.freeze())
    }
}
