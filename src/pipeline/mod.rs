//! Pipeline wiring between the subsystems.
//!
//! # Data Flow
//! ```text
//! capture channel
//!     → ingest.rs (select! over segments and the eviction ticker)
//!     → Assembler
//!     → factory.rs (one Extractor task per flow)
//!     → handler.rs (one task per request: decide, then forward)
//! ```
//!
//! Extractor and request tasks are both counted by `tasks.rs`, so the
//! shutdown drain covers bytes still being parsed.

pub mod factory;
pub mod handler;
pub mod ingest;
pub mod tasks;

pub use factory::HttpStreamFactory;
pub use handler::ShadowHandler;
pub use ingest::{run_ingest, EvictionClock, IngestConfig};
pub use tasks::{TaskGuard, TaskTracker};
