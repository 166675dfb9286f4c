//! Captured request representation.
//!
//! # Responsibilities
//! - Hold one complete request as it appeared on the wire
//! - Carry the owning flow's context (client address, captured port)
//! - Answer the questions sampling and forwarding ask (host, path, user agent)
//!
//! # Design Decisions
//! - The target is kept as the raw string, never re-encoded
//! - Headers are an `http::HeaderMap`: case-insensitive, value order preserved

use std::net::IpAddr;

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{HeaderMap, Method, Uri, Version};

use crate::reassembly::FlowMeta;

/// A request reconstructed from a captured flow.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    /// Request target exactly as sent (origin-form or absolute-form).
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    /// Fully read, de-chunked body.
    pub body: Bytes,
    pub flow: FlowMeta,
}

impl CapturedRequest {
    /// Address of the client that sent the request.
    pub fn client_ip(&self) -> IpAddr {
        self.flow.client.ip()
    }

    /// Destination port the request was captured on.
    pub fn server_port(&self) -> u16 {
        self.flow.server.port()
    }

    /// First value of a header as text, if present and visible ASCII.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First User-Agent value as raw bytes; empty if absent.
    ///
    /// Raw so that agents carrying obs-text are still matchable.
    pub fn user_agent(&self) -> &[u8] {
        self.headers.get(USER_AGENT).map_or(&[][..], |v| v.as_bytes())
    }

    /// Host the request was addressed to.
    ///
    /// An absolute-form target's authority takes precedence over the Host header.
    pub fn host(&self) -> Option<&str> {
        if !self.target.starts_with('/') {
            if let Some(authority) = absolute_authority(&self.target) {
                return Some(authority);
            }
        }
        self.headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    /// Target path without query string.
    pub fn path(&self) -> &str {
        if self.target.starts_with('/') {
            return self.target.split(['?', '#']).next().unwrap_or("");
        }
        match absolute_authority(&self.target) {
            Some(authority) => {
                let rest = self
                    .target
                    .split_once("://")
                    .map_or("", |(_, rest)| &rest[authority.len()..]);
                rest.split(['?', '#']).next().unwrap_or("")
            }
            None => self.target.split(['?', '#']).next().unwrap_or(""),
        }
    }
}

/// Authority of an absolute-form target such as `http://host:8080/path`.
fn absolute_authority(target: &str) -> Option<&str> {
    let uri: Uri = target.parse().ok()?;
    uri.scheme()?;
    let authority = uri.authority()?.as_str();
    let (_, rest) = target.split_once("://")?;
    rest.starts_with(authority).then(|| &rest[..authority.len()])
}
