//! Sampling and filter engine.
//!
//! # Data Flow
//! ```text
//! CapturedRequest
//!     → key.rs (random / header / remote address → u64 seed)
//!     → engine.rs (seeded draw against the percentage)
//!     → filter.rs (health-check probes, static assets)
//!     → RouteTable lookup
//!     → Decision::Forward { url } | Decision::Drop(reason)
//! ```

pub mod engine;
pub mod filter;
pub mod key;

pub use engine::{Decision, DropReason, FilterEngine};
pub use key::SamplingKeyKind;
