//! Shadow forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! CapturedRequest + destination URL (from the sampling engine)
//!     → headers.rs (copy headers, add X-Forwarded-*)
//!     → client.rs (pooled hyper client, timeout, drain response)
//!     → response discarded
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: callers spawn `Forwarder::forward` and never await it
//! - Nothing flows back toward capture or the original client

pub mod client;
pub mod headers;

pub use client::{ForwardError, Forwarder};
pub use headers::forwarded_headers;
