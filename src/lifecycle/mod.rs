//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → engine + forwarder → health listener
//!     → packet source → capture thread → ingestion task
//!
//! Shutdown (shutdown.rs):
//!     Capture ended or signal → stop ingestion → close all flows
//!     → drain in-flight forwards → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Shutdown has a deadline: forwards still running after the drain period
//!   are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError};
