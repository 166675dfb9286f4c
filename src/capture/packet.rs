//! Captured frame and decoded TCP segment types.

use std::fmt;
use std::net::SocketAddr;
use std::time::SystemTime;

use bytes::Bytes;

/// A raw link-layer frame as handed out by a packet source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub timestamp: SystemTime,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, timestamp: SystemTime) -> Self {
        Self {
            data: data.into(),
            timestamp,
        }
    }
}

/// TCP control flags the reassembler cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// One TCP segment lifted out of a frame.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub seq: u32,
    pub flags: TcpFlags,
    pub payload: Bytes,
    pub timestamp: SystemTime,
}

impl TcpSegment {
    /// Sequence space consumed by this segment (SYN and FIN count as one byte each).
    pub fn seq_len(&self) -> u32 {
        self.payload.len() as u32 + u32::from(self.flags.syn) + u32::from(self.flags.fin)
    }
}

impl fmt::Display for TcpSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} seq={} len={}",
            self.src,
            self.dst,
            self.seq,
            self.payload.len()
        )
    }
}
