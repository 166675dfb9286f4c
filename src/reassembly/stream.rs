//! Reassembled stream handoff.
//!
//! # Responsibilities
//! - Define the [`StreamSink`] / [`StreamFactory`] seam between the assembler
//!   and whatever consumes a flow
//! - Provide the buffered reader stream: a non-blocking writer for the
//!   ingestion side and an [`AsyncRead`] for the consumer task
//!
//! # Design Decisions
//! - Delivery never awaits; the backlog is bounded by a byte counter instead
//! - End-of-data is dropping the writer, so it can happen exactly once
//! - A consumer that stops reading drops its reader; the next delivery fails
//!   with [`SinkError::Closed`] and the assembler releases the flow

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::reassembly::flow::FlowMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("stream consumer has gone away")]
    Closed,

    #[error("stream consumer is {pending} bytes behind")]
    Backlog { pending: usize },
}

/// Receives the in-order bytes of one flow direction.
pub trait StreamSink: Send {
    /// Hand over the next contiguous chunk.
    fn deliver(&mut self, data: Bytes) -> Result<(), SinkError>;

    /// Signal end-of-data. Consumes the sink, so it runs at most once.
    fn finish(self: Box<Self>);
}

/// Creates one sink per new flow.
pub trait StreamFactory {
    fn new_stream(&mut self, meta: &FlowMeta) -> Box<dyn StreamSink>;
}

/// Create a connected writer/reader pair.
pub fn reader_stream(max_backlog: usize) -> (StreamWriter, FlowReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));

    (
        StreamWriter {
            tx,
            backlog: Arc::clone(&backlog),
            max_backlog,
        },
        FlowReader {
            rx,
            current: Bytes::new(),
            backlog,
        },
    )
}

/// Ingestion side of a reader stream.
#[derive(Debug)]
pub struct StreamWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    backlog: Arc<AtomicUsize>,
    max_backlog: usize,
}

impl StreamSink for StreamWriter {
    fn deliver(&mut self, data: Bytes) -> Result<(), SinkError> {
        if self.tx.is_closed() {
            return Err(SinkError::Closed);
        }
        let pending = self.backlog.load(Ordering::Acquire);
        if pending + data.len() > self.max_backlog {
            return Err(SinkError::Backlog { pending });
        }

        self.backlog.fetch_add(data.len(), Ordering::AcqRel);
        self.tx.send(data).map_err(|_| SinkError::Closed)
    }

    fn finish(self: Box<Self>) {}
}

/// Consumer side of a reader stream.
///
/// Reads return `Ok(0)` once the writer has finished and every byte is consumed.
#[derive(Debug)]
pub struct FlowReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
    current: Bytes,
    backlog: Arc<AtomicUsize>,
}

impl AsyncRead for FlowReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                buf.put_slice(&this.current[..n]);
                this.current.advance(n);
                this.backlog.fetch_sub(n, Ordering::AcqRel);
                return Poll::Ready(Ok(()));
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => this.current = chunk,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
