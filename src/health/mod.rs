//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Load balancer TCP probe
//!     → listener.rs (accept, close immediately)
//!     → probe sees a completed handshake
//! ```
//!
//! # Design Decisions
//! - Liveness only: no payload is read or written
//! - Bind failure is fatal, since a silent instance would fail every probe

pub mod listener;

pub use listener::{HealthError, HealthListener};
