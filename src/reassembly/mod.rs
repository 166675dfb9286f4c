//! TCP stream reassembly.
//!
//! # Data Flow
//! ```text
//! TcpSegment
//!     → assembler.rs (flow table, orientation, termination)
//!     → half.rs (sequence tracking, out-of-order buffer)
//!     → stream.rs (StreamSink: in-order bytes, then end-of-data once)
//! ```
//!
//! # Design Decisions
//! - The assembler is single-owner and synchronous; consumers run elsewhere
//! - Flows are keyed direction-independently, oriented once at creation
//! - Idle eviction uses capture timestamps, so replayed files age correctly

pub mod assembler;
pub mod flow;
pub mod half;
pub mod stream;

pub use assembler::{Assembler, AssemblerConfig, AssemblerStats, CloseReason};
pub use flow::{FlowKey, FlowMeta};
pub use half::{HalfError, HalfStream, Progress};
pub use stream::{reader_stream, FlowReader, SinkError, StreamFactory, StreamSink, StreamWriter};
