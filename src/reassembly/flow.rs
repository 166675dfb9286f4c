//! Flow identity.

use std::fmt;
use std::net::SocketAddr;

/// Direction-independent key of a TCP connection.
///
/// Both directions of a connection map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    low: SocketAddr,
    high: SocketAddr,
}

impl FlowKey {
    pub fn new(a: SocketAddr, b: SocketAddr) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.low, self.high)
    }
}

/// Read-only context of a flow, handed to the stream factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMeta {
    /// The side that sends requests.
    pub client: SocketAddr,
    /// The side that was captured as the destination.
    pub server: SocketAddr,
}

impl FlowMeta {
    pub fn key(&self) -> FlowKey {
        FlowKey::new(self.client, self.server)
    }
}

impl fmt::Display for FlowMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.client, self.server)
    }
}
