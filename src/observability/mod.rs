//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! capture, reassembly, http, sampling, forward:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metric helpers are free functions so the hot path stays a single macro call
//! - Without an installed recorder the metric macros are no-ops

pub mod logging;
pub mod metrics;
